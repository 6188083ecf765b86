//! Parquet persistence for typed records.
//!
//! - [`ParquetSink`] buffers [`TypedRecord`]s and writes them as Arrow record
//!   batches through `parquet::arrow::ArrowWriter`.
//! - [`ParquetRecordReader`] streams a previously written file back as
//!   [`TypedRecord`]s, one batch at a time, matching columns to schema fields
//!   by name.
//!
//! Both sides share the per-field [`ColumnSpec`] derived from the schema, so
//! a file this module writes reads back into exactly the values written.

use std::{collections::VecDeque, fs::File, io::Write, path::Path, sync::Arc};

use arrow::{
    array::{
        Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array,
        Float64Array, Int32Array, Int64Array, NullArray, StringArray, TimestampMillisecondArray,
    },
    datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use log::{debug, warn};
use parquet::{
    arrow::{
        ArrowWriter,
        arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
    },
    basic::{Compression, GzipLevel},
    file::properties::WriterProperties,
};

use crate::{
    data::{DecimalBytes, TypedRecord, TypedValue},
    error::{ConvertError, Result},
    merge::RecordSink,
    resolver::{LogicalType, TypeResolver},
    schema::{BaseType, Schema},
};

pub const BATCH_ROWS: usize = 8 * 1024;
const MAX_DECIMAL128_PRECISION: u32 = 38;

/// Compression codec selected for the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCompression {
    Uncompressed,
    #[default]
    Gzip,
    Snappy,
    Lzo,
}

impl OutputCompression {
    /// Maps a user-supplied label; anything unrecognised selects gzip.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "uncompressed" | "none" => OutputCompression::Uncompressed,
            "snappy" => OutputCompression::Snappy,
            "lzo" => OutputCompression::Lzo,
            "gzip" => OutputCompression::Gzip,
            other => {
                warn!("Unknown compression '{other}', using gzip");
                OutputCompression::Gzip
            }
        }
    }

    /// Label used in output file names.
    pub fn label(&self) -> &'static str {
        match self {
            OutputCompression::Uncompressed => "uncompressed",
            OutputCompression::Gzip => "gzip",
            OutputCompression::Snappy => "snappy",
            OutputCompression::Lzo => "lzo",
        }
    }

    /// The Parquet codec actually written. The Rust Parquet writer has no LZO
    /// encoder, so LZO requests are written with LZ4 (raw) instead.
    pub fn codec(&self) -> Compression {
        match self {
            OutputCompression::Uncompressed => Compression::UNCOMPRESSED,
            OutputCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            OutputCompression::Snappy => Compression::SNAPPY,
            OutputCompression::Lzo => Compression::LZ4_RAW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Int,
    Date,
    Long,
    TimestampMillis,
    Float,
    Double,
    Binary,
    Decimal { precision: u8, scale: i8 },
    Utf8,
    /// The field never receives a value.
    Unset,
}

impl ColumnKind {
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::Int => DataType::Int32,
            ColumnKind::Date => DataType::Date32,
            ColumnKind::Long => DataType::Int64,
            ColumnKind::TimestampMillis => DataType::Timestamp(TimeUnit::Millisecond, None),
            ColumnKind::Float => DataType::Float32,
            ColumnKind::Double => DataType::Float64,
            ColumnKind::Binary => DataType::Binary,
            ColumnKind::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
            ColumnKind::Utf8 => DataType::Utf8,
            ColumnKind::Unset => DataType::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

/// Derives one column per schema field, in schema order.
pub fn column_specs(schema: &Schema, resolver: &mut TypeResolver) -> Result<Vec<ColumnSpec>> {
    schema
        .fields
        .iter()
        .map(|field| {
            let resolved = resolver.resolve(field);
            let logical = resolved.logical_type.as_ref();
            let kind = match resolved.base_type {
                BaseType::Boolean => ColumnKind::Boolean,
                BaseType::Int => match logical {
                    None => ColumnKind::Int,
                    Some(LogicalType::Date) => ColumnKind::Date,
                    Some(_) => ColumnKind::Unset,
                },
                BaseType::Long => match logical {
                    None => ColumnKind::Long,
                    Some(LogicalType::TimestampMillis) => ColumnKind::TimestampMillis,
                    Some(_) => ColumnKind::Unset,
                },
                BaseType::Float => ColumnKind::Float,
                BaseType::Double => ColumnKind::Double,
                BaseType::Bytes | BaseType::Fixed => match logical {
                    None => ColumnKind::Binary,
                    Some(LogicalType::Decimal) => {
                        let scale = resolved.decimal_scale.unwrap_or(0);
                        let precision = resolved
                            .decimal_precision
                            .unwrap_or(MAX_DECIMAL128_PRECISION);
                        decimal_kind(&field.name, precision, scale)?
                    }
                    Some(_) => ColumnKind::Unset,
                },
                BaseType::String => ColumnKind::Utf8,
                BaseType::Null
                | BaseType::Record
                | BaseType::Enum
                | BaseType::Array
                | BaseType::Map
                | BaseType::Union
                | BaseType::Other => ColumnKind::Unset,
            };
            Ok(ColumnSpec {
                name: field.name.clone(),
                nullable: kind == ColumnKind::Unset || field.is_nullable(),
                kind,
            })
        })
        .collect()
}

fn decimal_kind(field: &str, precision: u32, scale: u32) -> Result<ColumnKind> {
    if precision == 0 || precision > MAX_DECIMAL128_PRECISION || scale > precision {
        return Err(ConvertError::Schema(format!(
            "field '{field}': decimal({precision},{scale}) is outside 1..={MAX_DECIMAL128_PRECISION} digits"
        )));
    }
    Ok(ColumnKind::Decimal {
        precision: precision as u8,
        scale: scale as i8,
    })
}

pub fn arrow_schema(columns: &[ColumnSpec]) -> SchemaRef {
    let fields = columns
        .iter()
        .map(|column| ArrowField::new(&column.name, column.kind.data_type(), column.nullable))
        .collect::<Vec<_>>();
    Arc::new(ArrowSchema::new(fields))
}

pub struct ParquetSink<W: Write + Send> {
    writer: Option<ArrowWriter<W>>,
    schema: SchemaRef,
    columns: Vec<ColumnSpec>,
    buffer: Vec<TypedRecord>,
    rows_written: u64,
}

impl ParquetSink<File> {
    pub fn create(path: &Path, columns: Vec<ColumnSpec>, compression: OutputCompression) -> Result<Self> {
        let file = File::create(path)?;
        Self::try_new(file, columns, compression)
    }
}

impl<W: Write + Send> ParquetSink<W> {
    pub fn try_new(writer: W, columns: Vec<ColumnSpec>, compression: OutputCompression) -> Result<Self> {
        let schema = arrow_schema(&columns);
        let props = WriterProperties::builder()
            .set_compression(compression.codec())
            .set_dictionary_enabled(true)
            .build();
        let writer = ArrowWriter::try_new(writer, schema.clone(), Some(props))?;
        Ok(Self {
            writer: Some(writer),
            schema,
            columns,
            buffer: Vec::with_capacity(BATCH_ROWS),
            rows_written: 0,
        })
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let arrays = self
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| build_column(column, index, &self.buffer))
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        let writer = self.writer.as_mut().ok_or_else(|| {
            ConvertError::Io(std::io::Error::other("parquet sink already closed"))
        })?;
        writer.write(&batch)?;
        self.rows_written += self.buffer.len() as u64;
        debug!("Flushed {} row(s) to parquet", self.buffer.len());
        self.buffer.clear();
        Ok(())
    }
}

impl<W: Write + Send> RecordSink for ParquetSink<W> {
    fn write(&mut self, record: TypedRecord) -> Result<()> {
        if record.len() != self.columns.len() {
            return Err(ConvertError::ColumnMismatch {
                field: "*".to_string(),
                message: format!(
                    "record has {} values for {} columns",
                    record.len(),
                    self.columns.len()
                ),
            });
        }
        if let Some(column) = self
            .columns
            .iter()
            .zip(record.values())
            .find(|(column, value)| !column.nullable && value.is_none())
            .map(|(column, _)| column)
        {
            return Err(ConvertError::MissingValue {
                field: column.name.clone(),
            });
        }
        self.buffer.push(record);
        if self.buffer.len() >= BATCH_ROWS {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.flush_batch()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

fn mismatch(column: &ColumnSpec, found: &TypedValue) -> ConvertError {
    ConvertError::ColumnMismatch {
        field: column.name.clone(),
        message: format!("expected {:?}, found {found:?}", column.kind),
    }
}

fn collect_values<'r, T>(
    column: &ColumnSpec,
    index: usize,
    records: &'r [TypedRecord],
    extract: impl Fn(&'r TypedValue) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    records
        .iter()
        .map(|record| match record.get(index) {
            None => Ok(None),
            Some(value) => extract(value).map(Some).ok_or_else(|| mismatch(column, value)),
        })
        .collect()
}

fn build_column(column: &ColumnSpec, index: usize, records: &[TypedRecord]) -> Result<ArrayRef> {
    let array: ArrayRef = match column.kind {
        ColumnKind::Boolean => Arc::new(BooleanArray::from(collect_values(
            column,
            index,
            records,
            |v| match v {
                TypedValue::Boolean(b) => Some(*b),
                _ => None,
            },
        )?)),
        ColumnKind::Int => Arc::new(Int32Array::from(collect_values(column, index, records, |v| {
            match v {
                TypedValue::Int(i) => Some(*i),
                _ => None,
            }
        })?)),
        ColumnKind::Date => Arc::new(Date32Array::from(collect_values(column, index, records, |v| {
            match v {
                TypedValue::Date(days) => Some(*days),
                _ => None,
            }
        })?)),
        ColumnKind::Long => Arc::new(Int64Array::from(collect_values(column, index, records, |v| {
            match v {
                TypedValue::Long(l) => Some(*l),
                _ => None,
            }
        })?)),
        ColumnKind::TimestampMillis => Arc::new(TimestampMillisecondArray::from(collect_values(
            column,
            index,
            records,
            |v| match v {
                TypedValue::TimestampMillis(ms) => Some(*ms),
                _ => None,
            },
        )?)),
        ColumnKind::Float => Arc::new(Float32Array::from(collect_values(
            column,
            index,
            records,
            |v| match v {
                TypedValue::Float(f) => Some(*f),
                _ => None,
            },
        )?)),
        ColumnKind::Double => Arc::new(Float64Array::from(collect_values(
            column,
            index,
            records,
            |v| match v {
                TypedValue::Double(d) => Some(*d),
                _ => None,
            },
        )?)),
        ColumnKind::Binary => Arc::new(BinaryArray::from(collect_values(
            column,
            index,
            records,
            |v| match v {
                TypedValue::Bytes(bytes) => Some(bytes.as_slice()),
                _ => None,
            },
        )?)),
        ColumnKind::Decimal { precision, scale } => {
            let limit = 10i128.pow(u32::from(precision));
            let values = collect_values(column, index, records, |v| match v {
                TypedValue::Decimal(d) if d.scale == scale as u32 => d.to_i128().ok(),
                _ => None,
            })?;
            // The writer narrows small precisions to INT32/INT64, so an
            // oversized value would be stored truncated rather than refused.
            let too_wide = values
                .iter()
                .flatten()
                .find(|v| v.unsigned_abs() >= limit.unsigned_abs());
            if let Some(wide) = too_wide {
                return Err(ConvertError::ColumnMismatch {
                    field: column.name.clone(),
                    message: format!(
                        "unscaled value {wide} needs more than {precision} digits"
                    ),
                });
            }
            Arc::new(Decimal128Array::from(values).with_precision_and_scale(precision, scale)?)
        }
        ColumnKind::Utf8 => Arc::new(StringArray::from(collect_values(
            column,
            index,
            records,
            |v| match v {
                TypedValue::String(s) => Some(s.as_str()),
                _ => None,
            },
        )?)),
        ColumnKind::Unset => Arc::new(NullArray::new(records.len())),
    };
    Ok(array)
}

/// Streams typed records out of a Parquet file.
pub struct ParquetRecordReader {
    batches: ParquetRecordBatchReader,
    columns: Vec<ColumnSpec>,
    pending: VecDeque<TypedRecord>,
}

impl ParquetRecordReader {
    pub fn open(path: &Path, columns: Vec<ColumnSpec>) -> Result<Self> {
        let file = File::open(path)?;
        let batches = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(BATCH_ROWS)
            .build()?;
        Ok(Self {
            batches,
            columns,
            pending: VecDeque::new(),
        })
    }

    fn decode_batch(&self, batch: &RecordBatch) -> Result<VecDeque<TypedRecord>> {
        let schema = batch.schema();
        let arrays = self
            .columns
            .iter()
            .map(|column| {
                schema
                    .index_of(&column.name)
                    .ok()
                    .map(|idx| batch.column(idx).clone())
            })
            .collect::<Vec<Option<ArrayRef>>>();

        (0..batch.num_rows())
            .map(|row| {
                self.columns
                    .iter()
                    .zip(&arrays)
                    .map(|(column, array)| match array {
                        Some(array) => decode_value(column, array.as_ref(), row),
                        None => Ok(None),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(TypedRecord::new)
            })
            .collect()
    }
}

impl Iterator for ParquetRecordReader {
    type Item = Result<TypedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            let batch = match self.batches.next()? {
                Ok(batch) => batch,
                Err(err) => return Some(Err(err.into())),
            };
            match self.decode_batch(&batch) {
                Ok(records) => self.pending = records,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

fn downcast<'a, T: Array + 'static>(column: &ColumnSpec, array: &'a dyn Array) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ConvertError::ColumnMismatch {
            field: column.name.clone(),
            message: format!(
                "expected {}, found {}",
                column.kind.data_type(),
                array.data_type()
            ),
        })
}

fn decode_value(column: &ColumnSpec, array: &dyn Array, row: usize) -> Result<Option<TypedValue>> {
    if column.kind == ColumnKind::Unset || array.is_null(row) {
        return Ok(None);
    }
    let value = match column.kind {
        ColumnKind::Boolean => TypedValue::Boolean(downcast::<BooleanArray>(column, array)?.value(row)),
        ColumnKind::Int => TypedValue::Int(downcast::<Int32Array>(column, array)?.value(row)),
        ColumnKind::Date => TypedValue::Date(downcast::<Date32Array>(column, array)?.value(row)),
        ColumnKind::Long => TypedValue::Long(downcast::<Int64Array>(column, array)?.value(row)),
        ColumnKind::TimestampMillis => TypedValue::TimestampMillis(
            downcast::<TimestampMillisecondArray>(column, array)?.value(row),
        ),
        ColumnKind::Float => TypedValue::Float(downcast::<Float32Array>(column, array)?.value(row)),
        ColumnKind::Double => TypedValue::Double(downcast::<Float64Array>(column, array)?.value(row)),
        ColumnKind::Binary => {
            TypedValue::Bytes(downcast::<BinaryArray>(column, array)?.value(row).to_vec())
        }
        ColumnKind::Decimal { scale, .. } => {
            let decimals = downcast::<Decimal128Array>(column, array)?;
            if decimals.scale() != scale {
                return Err(ConvertError::ColumnMismatch {
                    field: column.name.clone(),
                    message: format!("expected scale {scale}, found {}", decimals.scale()),
                });
            }
            TypedValue::Decimal(DecimalBytes::from_unscaled(decimals.value(row), scale as u32))
        }
        ColumnKind::Utf8 => TypedValue::String(downcast::<StringArray>(column, array)?.value(row).to_string()),
        ColumnKind::Unset => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::parse_decimal;

    fn schema() -> Schema {
        Schema::from_json_str(
            r#"{"type":"record","name":"t","fields":[
                {"name":"id","type":"string"},
                {"name":"flag","type":["null","boolean"]},
                {"name":"day","type":["null",{"type":"int","logicalType":"date"}]},
                {"name":"at","type":["null",{"type":"long","logicalType":"timestamp-millis"}]},
                {"name":"price","type":["null",{"type":"bytes","logicalType":"decimal","precision":9,"scale":2}]},
                {"name":"blob","type":["null","bytes"]},
                {"name":"tags","type":["null",{"type":"array","items":"string"}]}]}"#,
        )
        .unwrap()
    }

    fn specs() -> Vec<ColumnSpec> {
        column_specs(&schema(), &mut TypeResolver::new()).unwrap()
    }

    #[test]
    fn compression_labels_fall_back_to_gzip() {
        assert_eq!(OutputCompression::from_label("snappy"), OutputCompression::Snappy);
        assert_eq!(OutputCompression::from_label("NONE"), OutputCompression::Uncompressed);
        assert_eq!(OutputCompression::from_label("brotli"), OutputCompression::Gzip);
        assert_eq!(OutputCompression::Lzo.label(), "lzo");
    }

    #[test]
    fn column_kinds_follow_resolved_types() {
        let kinds = specs().iter().map(|c| c.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                ColumnKind::Utf8,
                ColumnKind::Boolean,
                ColumnKind::Date,
                ColumnKind::TimestampMillis,
                ColumnKind::Decimal {
                    precision: 9,
                    scale: 2
                },
                ColumnKind::Binary,
                ColumnKind::Unset,
            ]
        );
        assert!(!specs()[0].nullable);
        assert!(specs()[6].nullable);
    }

    #[test]
    fn oversized_decimal_precision_is_rejected() {
        let schema = Schema::from_json_str(
            r#"{"type":"record","name":"t","fields":[
                {"name":"d","type":{"type":"bytes","logicalType":"decimal","precision":40,"scale":2}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            column_specs(&schema, &mut TypeResolver::new()),
            Err(ConvertError::Schema(_))
        ));
    }

    #[test]
    fn writes_and_reads_back_every_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        let records = vec![
            TypedRecord::new(vec![
                Some(TypedValue::String("A".into())),
                Some(TypedValue::Boolean(true)),
                Some(TypedValue::Date(18322)),
                Some(TypedValue::TimestampMillis(1_583_020_800_000)),
                Some(TypedValue::Decimal(parse_decimal("10.005", 2).unwrap())),
                Some(TypedValue::Bytes(vec![0, 159, 255])),
                None,
            ]),
            TypedRecord::new(vec![
                Some(TypedValue::String("B".into())),
                None,
                None,
                None,
                Some(TypedValue::Decimal(parse_decimal("-3", 2).unwrap())),
                None,
                None,
            ]),
        ];

        let mut sink = ParquetSink::create(&path, specs(), OutputCompression::Snappy).unwrap();
        for record in records.clone() {
            sink.write(record).unwrap();
        }
        sink.finish().unwrap();
        assert_eq!(sink.rows_written(), 2);

        let read = ParquetRecordReader::open(&path, specs())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn decimal_wider_than_column_precision_is_refused() {
        let mut sink = ParquetSink::try_new(Vec::new(), specs(), OutputCompression::Uncompressed).unwrap();
        let mut values = vec![Some(TypedValue::String("A".into()))];
        values.extend([None, None, None]);
        values.push(Some(TypedValue::Decimal(DecimalBytes::from_unscaled(1_234_567_890_100, 2))));
        values.extend([None, None]);
        let outcome = sink.write(TypedRecord::new(values)).and_then(|_| sink.finish());
        assert!(matches!(
            outcome,
            Err(ConvertError::ColumnMismatch { field, .. }) if field == "price"
        ));
    }

    #[test]
    fn null_in_required_column_is_refused() {
        let mut sink = ParquetSink::try_new(Vec::new(), specs(), OutputCompression::Uncompressed).unwrap();
        let record = TypedRecord::new(vec![None; 7]);
        assert!(matches!(
            sink.write(record),
            Err(ConvertError::MissingValue { field }) if field == "id"
        ));
    }

    #[test]
    fn missing_prior_columns_read_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narrow.parquet");
        let narrow = vec![ColumnSpec {
            name: "id".into(),
            kind: ColumnKind::Utf8,
            nullable: false,
        }];
        let mut sink = ParquetSink::create(&path, narrow, OutputCompression::Gzip).unwrap();
        sink.write(TypedRecord::new(vec![Some(TypedValue::String("A".into()))]))
            .unwrap();
        sink.finish().unwrap();

        let read = ParquetRecordReader::open(&path, specs())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].get(0), Some(&TypedValue::String("A".into())));
        assert!(read[0].values()[1..].iter().all(Option::is_none));
    }
}
