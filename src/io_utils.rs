//! Input reading and output naming.
//!
//! All delimited-text input flows through this module:
//!
//! - **Format**: delimiter, quote and quote-escape characters via [`CsvFormat`].
//!   An escape equal to the quote character means doubled quotes (`""`).
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Rows**: [`RawRows`] yields every record as a `Vec<String>`, without
//!   header handling and without enforcing a column count; both belong to the
//!   job.
//! - **Naming**: [`OutputPaths`] places the output and the staging copy of a
//!   prior output next to the input.

use std::{
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Result as AnyResult, anyhow};
use csv::{ByteRecord, Trim};
use encoding_rs::{Encoding, UTF_8};

use crate::{
    error::{ConvertError, Result},
    parquet_io::OutputCompression,
};

pub const DEFAULT_DELIMITER: u8 = b',';
pub const DEFAULT_QUOTE: u8 = b'"';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvFormat {
    pub delimiter: u8,
    pub quote: u8,
    pub quote_escape: u8,
    /// Strip leading and trailing whitespace from every value.
    pub trim: bool,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            quote: DEFAULT_QUOTE,
            quote_escape: DEFAULT_QUOTE,
            trim: true,
        }
    }
}

pub fn resolve_encoding(label: Option<&str>) -> AnyResult<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_csv_reader<R>(reader: R, format: &CsvFormat) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(format.delimiter)
        .quote(format.quote)
        .flexible(true)
        .trim(if format.trim { Trim::All } else { Trim::None });
    if format.quote_escape == format.quote {
        builder.double_quote(true).escape(None);
    } else {
        builder.double_quote(false).escape(Some(format.quote_escape));
    }
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    format: &CsvFormat,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(open_csv_reader(BufReader::new(file), format))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(ConvertError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to decode text with encoding {}", encoding.name()),
        )))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Lazy, single-pass sequence of raw rows.
pub struct RawRows<R> {
    reader: csv::Reader<R>,
    record: ByteRecord,
    encoding: &'static Encoding,
}

impl<R: Read> RawRows<R> {
    pub fn new(reader: csv::Reader<R>, encoding: &'static Encoding) -> Self {
        Self {
            reader,
            record: ByteRecord::new(),
            encoding,
        }
    }
}

impl RawRows<BufReader<File>> {
    pub fn from_path(path: &Path, format: &CsvFormat, encoding: &'static Encoding) -> Result<Self> {
        Ok(Self::new(open_csv_reader_from_path(path, format)?, encoding))
    }
}

impl<R: Read> Iterator for RawRows<R> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => Some(decode_record(&self.record, self.encoding)),
            Ok(false) => None,
            Err(err) => Some(Err(err.into())),
        }
    }
}

/// Files to convert for one input: the file itself, or every regular file
/// directly inside a directory, sorted by name.
pub fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(input)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// `<parent>/<stem>.<compression>.parquet`
    pub output: PathBuf,
    /// `<parent>/<stem>.original.parquet`, where a prior output is staged.
    pub staging: PathBuf,
}

impl OutputPaths {
    pub fn for_input(input: &Path, compression: OutputCompression) -> Self {
        let parent = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        Self {
            output: parent.join(format!("{stem}.{}.parquet", compression.label())),
            staging: parent.join(format!("{stem}.original.parquet")),
        }
    }

    /// Object name of the output, used as the key in the prior-output store.
    pub fn object_name(&self) -> String {
        self.output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
