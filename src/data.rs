use std::fmt;

use chrono::DateTime;
use rust_decimal::Decimal;

use crate::error::ParseError;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A value in the exact representation the columnar writer stores.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Boolean(bool),
    Int(i32),
    /// Days since 1970-01-01.
    Date(i32),
    Long(i64),
    /// Milliseconds since the epoch, local offset already applied.
    TimestampMillis(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    Decimal(DecimalBytes),
    String(String),
}

impl TypedValue {
    /// Text used as a uniqueness key when this value comes from a prior
    /// output file. Chosen to match the raw input text that produced it.
    pub fn key_text(&self) -> String {
        match self {
            TypedValue::Boolean(b) => b.to_string(),
            TypedValue::Int(i) => i.to_string(),
            TypedValue::Date(days) => {
                DateTime::from_timestamp(i64::from(*days) * SECONDS_PER_DAY, 0)
                    .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| days.to_string())
            }
            TypedValue::Long(l) => l.to_string(),
            TypedValue::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms)
                .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| ms.to_string()),
            TypedValue::Float(f) => f.to_string(),
            TypedValue::Double(d) => d.to_string(),
            TypedValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            TypedValue::Decimal(decimal) => decimal
                .to_plain_text()
                .unwrap_or_else(|_| decimal.to_string()),
            TypedValue::String(s) => s.clone(),
        }
    }
}

/// Fixed-scale decimal stored as the two's-complement, big-endian bytes of
/// its unscaled integer, the shortest such encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecimalBytes {
    pub unscaled: Vec<u8>,
    pub scale: u32,
}

impl DecimalBytes {
    pub fn from_unscaled(unscaled: i128, scale: u32) -> Self {
        let full = unscaled.to_be_bytes();
        let mut start = 0;
        while start < full.len() - 1 {
            let redundant_positive = full[start] == 0x00 && full[start + 1] & 0x80 == 0;
            let redundant_negative = full[start] == 0xFF && full[start + 1] & 0x80 != 0;
            if !(redundant_positive || redundant_negative) {
                break;
            }
            start += 1;
        }
        Self {
            unscaled: full[start..].to_vec(),
            scale,
        }
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Self::from_unscaled(value.mantissa(), value.scale())
    }

    pub fn to_i128(&self) -> Result<i128, ParseError> {
        if self.unscaled.is_empty() || self.unscaled.len() > 16 {
            return Err(ParseError::new(
                "decimal",
                &format!("{:02x?}", self.unscaled),
                format!("{} bytes cannot hold a 128-bit unscaled value", self.unscaled.len()),
            ));
        }
        let fill = if self.unscaled[0] & 0x80 != 0 { 0xFF } else { 0x00 };
        let mut buffer = [fill; 16];
        buffer[16 - self.unscaled.len()..].copy_from_slice(&self.unscaled);
        Ok(i128::from_be_bytes(buffer))
    }

    /// Plain notation with exactly `scale` fractional digits, e.g. `-0.50`.
    pub fn to_plain_text(&self) -> Result<String, ParseError> {
        let unscaled = self.to_i128()?;
        let digits = unscaled.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let sign = if unscaled < 0 { "-" } else { "" };
        if scale == 0 {
            return Ok(format!("{sign}{digits}"));
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (whole, fraction) = padded.split_at(padded.len() - scale);
        Ok(format!("{sign}{whole}.{fraction}"))
    }

    pub fn to_decimal(&self) -> Result<Decimal, ParseError> {
        let unscaled = self.to_i128()?;
        Decimal::try_from_i128_with_scale(unscaled, self.scale)
            .map_err(|err| ParseError::new("decimal", &unscaled.to_string(), err))
    }
}

impl fmt::Display for DecimalBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_i128() {
            Ok(unscaled) => write!(f, "{unscaled}E-{}", self.scale),
            Err(_) => write!(f, "{:02x?}E-{}", self.unscaled, self.scale),
        }
    }
}

/// One output row: a value per schema field, `None` where the field is unset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedRecord {
    values: Vec<Option<TypedValue>>,
}

impl TypedRecord {
    pub fn new(values: Vec<Option<TypedValue>>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&TypedValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn values(&self) -> &[Option<TypedValue>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Uniqueness key of the value at `index`; unset values key as `""`, the
    /// same text an empty input column produces.
    pub fn key_text(&self, index: usize) -> String {
        self.get(index).map(TypedValue::key_text).unwrap_or_default()
    }
}
