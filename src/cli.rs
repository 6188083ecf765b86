use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Convert CSV files to Parquet using an Avro schema", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert CSV files into Parquet, optionally deduplicating and merging with a prior output
    Convert(ConvertArgs),
    /// Print how each schema field resolves to a storage type
    Schema(SchemaArgs),
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// CSV file or directory of CSV files; repeat to run several independent jobs
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Avro schema (.avsc) describing the output columns
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Output compression: gzip, snappy, lzo or uncompressed
    #[arg(long, default_value = "gzip")]
    pub compression: String,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter, default_value = ",")]
    pub delimiter: u8,
    /// Quote character
    #[arg(long, value_parser = parse_ascii_char, default_value = "\"")]
    pub quote: u8,
    /// Character escaping a quote inside a quoted value (same as quote means doubled quotes)
    #[arg(long = "quote-escape", value_parser = parse_ascii_char, default_value = "\"")]
    pub quote_escape: u8,
    /// Treat the first row of every input file as a header
    #[arg(long)]
    pub header: bool,
    /// Keep leading and trailing whitespace around values
    #[arg(long = "keep-whitespace")]
    pub keep_whitespace: bool,
    /// Delete the input after a successful conversion
    #[arg(long)]
    pub replace: bool,
    /// Zero-based column index holding the unique key
    #[arg(long = "field-key")]
    pub field_key: Option<usize>,
    /// Admit rows whose key was already seen
    #[arg(long)]
    pub duplicated: bool,
    /// Merge the new rows with the previous output from the object store
    #[arg(long, requires = "bucket")]
    pub merge: bool,
    /// Root directory of the object store holding previous outputs
    #[arg(long)]
    pub bucket: Option<PathBuf>,
    /// Partition inside the object store
    #[arg(long, default_value = "")]
    pub mode: String,
    /// Time zone for date and timestamp values: local, UTC or an offset like -03:00
    #[arg(long, default_value = "local")]
    pub timezone: String,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Log every duplicated key
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Avro schema (.avsc) to inspect
    #[arg(short, long)]
    pub schema: PathBuf,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => parse_ascii_char(other).map_err(|err| format!("Delimiter {err}")),
    }
}

pub fn parse_ascii_char(value: &str) -> Result<u8, String> {
    let mut chars = value.chars();
    let first = chars
        .next()
        .ok_or_else(|| "cannot be empty".to_string())?;
    if chars.next().is_some() {
        return Err("must be a single character".to_string());
    }
    if !first.is_ascii() {
        return Err("must be ASCII".to_string());
    }
    Ok(first as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_aliases() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("pipe"), Ok(b'|'));
        assert_eq!(parse_delimiter("#"), Ok(b'#'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn convert_defaults() {
        let cli = Cli::try_parse_from(["csv-to-parquet", "convert", "-i", "a.csv", "-s", "a.avsc"])
            .unwrap();
        let Commands::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.compression, "gzip");
        assert_eq!(args.delimiter, b',');
        assert_eq!(args.quote, b'"');
        assert_eq!(args.quote_escape, b'"');
        assert_eq!(args.timezone, "local");
        assert!(args.field_key.is_none());
        assert!(!args.merge);
    }

    #[test]
    fn merge_requires_bucket() {
        let parsed = Cli::try_parse_from([
            "csv-to-parquet", "convert", "-i", "a.csv", "-s", "a.avsc", "--merge",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn inputs_are_repeatable() {
        let cli = Cli::try_parse_from([
            "csv-to-parquet", "convert", "-i", "a.csv", "-i", "b", "-s", "a.avsc",
        ])
        .unwrap();
        let Commands::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.inputs, vec![PathBuf::from("a.csv"), PathBuf::from("b")]);
    }
}
