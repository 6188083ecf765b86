//! Raw text to typed value coercion.
//!
//! [`ValueCoercer::coerce`] turns one raw column value into the exact value
//! the columnar writer stores for the field's resolved type. The failure
//! policy is deliberately uneven:
//!
//! - malformed integers and floating point numbers become zero, silently;
//! - malformed dates, timestamps and decimals are a [`ParseError`], which the
//!   row converter turns into a fatal job error, as is a decimal with more
//!   digits than its field declares.
//!
//! Date and timestamp values are interpreted as wall-clock time in the job's
//! [`TimeZoneSetting`]; the zone's UTC offset at that instant is then added
//! back, so the stored number encodes the wall-clock reading itself.

use std::str::FromStr;

use chrono::{
    DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeDelta, TimeZone, Utc,
};

use crate::{
    data::{DecimalBytes, TypedValue},
    error::ParseError,
    resolver::{LogicalType, ResolvedField},
    schema::BaseType,
};

pub const DATE_PATTERN: &str = "%Y-%m-%d";
pub const TIMESTAMP_PATTERN: &str = "%Y-%m-%d %H:%M:%S";
pub const MILLIS_PER_DAY: i64 = 1000 * 60 * 60 * 24;
/// Digits a 128-bit unscaled decimal can always hold.
pub const MAX_DECIMAL_DIGITS: u32 = 38;

/// Zone used to interpret wall-clock dates and timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZoneSetting {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl FromStr for TimeZoneSetting {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("local") {
            return Ok(TimeZoneSetting::Local);
        }
        if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
            return Ok(TimeZoneSetting::Fixed(Utc.fix()));
        }
        FixedOffset::from_str(trimmed)
            .map(TimeZoneSetting::Fixed)
            .map_err(|_| format!("Unknown time zone '{value}' (use local, UTC or +HH:MM)"))
    }
}

impl TimeZoneSetting {
    /// Epoch milliseconds of `local` in this zone plus the zone's UTC offset
    /// at that instant.
    pub fn offset_adjusted_millis(&self, local: NaiveDateTime) -> i64 {
        match self {
            TimeZoneSetting::Local => offset_adjusted_millis(&Local, local),
            TimeZoneSetting::Fixed(offset) => offset_adjusted_millis(offset, local),
        }
    }
}

fn offset_adjusted_millis<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> i64 {
    let instant = locate(tz, local);
    let offset_millis = i64::from(instant.offset().fix().local_minus_utc()) * 1000;
    instant.timestamp_millis() + offset_millis
}

// Wall-clock times inside a DST gap are read with the offset in force before
// the transition, which lands them after the gap.
fn locate<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let before = tz
                .offset_from_local_datetime(&(local - TimeDelta::days(1)))
                .earliest()
                .map(|offset| offset.fix())
                .unwrap_or_else(|| Utc.fix());
            let utc = local - TimeDelta::seconds(i64::from(before.local_minus_utc()));
            tz.from_utc_datetime(&utc)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCoercer {
    time_zone: TimeZoneSetting,
}

impl ValueCoercer {
    pub fn new(time_zone: TimeZoneSetting) -> Self {
        Self { time_zone }
    }

    pub fn time_zone(&self) -> TimeZoneSetting {
        self.time_zone
    }

    /// Coerces `raw` for a field of type `resolved`.
    ///
    /// Returns `Ok(None)` when the field must stay unset: empty input, a base
    /// type without a conversion rule, or a logical type the base type does
    /// not support.
    pub fn coerce(
        &self,
        raw: &str,
        resolved: &ResolvedField,
    ) -> Result<Option<TypedValue>, ParseError> {
        if raw.is_empty() {
            return Ok(None);
        }
        let logical = resolved.logical_type.as_ref();
        let value = match resolved.base_type {
            BaseType::Boolean => Some(TypedValue::Boolean(parse_boolean(raw))),
            BaseType::Int => match logical {
                None => Some(TypedValue::Int(raw.parse::<i32>().unwrap_or(0))),
                Some(LogicalType::Date) => Some(TypedValue::Date(self.epoch_day(raw)?)),
                Some(_) => None,
            },
            BaseType::Long => match logical {
                None => Some(TypedValue::Long(raw.parse::<i64>().unwrap_or(0))),
                Some(LogicalType::TimestampMillis) => {
                    Some(TypedValue::TimestampMillis(self.timestamp_millis(raw)?))
                }
                Some(_) => None,
            },
            BaseType::Float => Some(TypedValue::Float(raw.trim().parse::<f32>().unwrap_or(0.0))),
            BaseType::Double => {
                Some(TypedValue::Double(raw.trim().parse::<f64>().unwrap_or(0.0)))
            }
            BaseType::Bytes | BaseType::Fixed => match logical {
                None => Some(TypedValue::Bytes(raw.as_bytes().to_vec())),
                Some(LogicalType::Decimal) => {
                    let value = parse_decimal(raw, resolved.decimal_scale.unwrap_or(0))?;
                    ensure_precision(raw, &value, resolved.decimal_precision)?;
                    Some(TypedValue::Decimal(value))
                }
                Some(_) => None,
            },
            BaseType::String => Some(TypedValue::String(raw.to_string())),
            BaseType::Null
            | BaseType::Record
            | BaseType::Enum
            | BaseType::Array
            | BaseType::Map
            | BaseType::Union
            | BaseType::Other => None,
        };
        Ok(value)
    }

    /// Days since the epoch for a `yyyy-MM-dd` value: local midnight in
    /// epoch milliseconds, plus the UTC offset, divided by a day. The
    /// division truncates toward zero.
    pub fn epoch_day(&self, raw: &str) -> Result<i32, ParseError> {
        let date = NaiveDate::parse_from_str(raw, DATE_PATTERN)
            .map_err(|err| ParseError::new("date", raw, err))?;
        let millis = self
            .time_zone
            .offset_adjusted_millis(date.and_time(NaiveTime::MIN));
        i32::try_from(millis / MILLIS_PER_DAY)
            .map_err(|_| ParseError::new("date", raw, "out of range for an epoch day"))
    }

    /// Epoch milliseconds for a `yyyy-MM-dd HH:mm:ss` value, plus the UTC
    /// offset in milliseconds.
    pub fn timestamp_millis(&self, raw: &str) -> Result<i64, ParseError> {
        let local = NaiveDateTime::parse_from_str(raw, TIMESTAMP_PATTERN)
            .map_err(|err| ParseError::new("timestamp", raw, err))?;
        Ok(self.time_zone.offset_adjusted_millis(local))
    }
}

pub fn parse_boolean(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "on" | "1"
    )
}

/// Parses an exact decimal and rescales it to `scale`. Discarded digits
/// round away from zero whenever any of them is non-zero, so `10.001` at
/// scale 2 becomes `10.01` and `-10.001` becomes `-10.01`.
///
/// Accepts an optional sign, a decimal point and an `e`/`E` exponent. The
/// unscaled result must fit in [`MAX_DECIMAL_DIGITS`] digits.
pub fn parse_decimal(raw: &str, scale: u32) -> Result<DecimalBytes, ParseError> {
    let fail = |reason: String| ParseError::new("decimal", raw, reason);
    if scale > MAX_DECIMAL_DIGITS {
        return Err(fail(format!(
            "scale {scale} exceeds the supported maximum of {MAX_DECIMAL_DIGITS}"
        )));
    }
    let text = raw.trim();
    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => {
            let exponent = unsigned[at + 1..]
                .parse::<i32>()
                .map_err(|err| fail(format!("invalid exponent: {err}")))?;
            (&unsigned[..at], exponent)
        }
        None => (unsigned, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.len() + fraction.len() == 0 || !all_digits(whole) || !all_digits(fraction) {
        return Err(fail("not a decimal number".to_string()));
    }

    let digits = format!("{whole}{fraction}");
    let digits = digits.trim_start_matches('0');
    // Power of ten that turns the digit string into the unscaled value.
    let shift = i64::from(exponent) - fraction.len() as i64 + i64::from(scale);
    let out_of_range = || fail(format!("does not fit in {MAX_DECIMAL_DIGITS} digits"));

    let magnitude = if shift >= 0 {
        let factor = u32::try_from(shift)
            .ok()
            .and_then(|shift| 10i128.checked_pow(shift));
        match (digits_value(digits), factor) {
            (Some(0), _) => 0,
            (Some(value), Some(factor)) => value.checked_mul(factor).ok_or_else(out_of_range)?,
            _ => return Err(out_of_range()),
        }
    } else {
        let dropped = usize::try_from(-shift).unwrap_or(usize::MAX);
        let kept_len = digits.len().saturating_sub(dropped);
        let (kept, discarded) = digits.split_at(kept_len);
        let kept = digits_value(kept).ok_or_else(out_of_range)?;
        if discarded.bytes().any(|b| b != b'0') {
            kept.checked_add(1).ok_or_else(out_of_range)?
        } else {
            kept
        }
    };
    if magnitude >= max_unscaled(MAX_DECIMAL_DIGITS) {
        return Err(out_of_range());
    }
    let unscaled = if negative { -magnitude } else { magnitude };
    Ok(DecimalBytes::from_unscaled(unscaled, scale))
}

/// Rejects `value` when its unscaled integer has more digits than
/// `precision`; without a declared precision the 128-bit limit applies.
pub fn ensure_precision(
    raw: &str,
    value: &DecimalBytes,
    precision: Option<u32>,
) -> Result<(), ParseError> {
    let precision = precision.unwrap_or(MAX_DECIMAL_DIGITS).min(MAX_DECIMAL_DIGITS);
    let unscaled = value.to_i128()?;
    if unscaled.unsigned_abs() >= max_unscaled(precision).unsigned_abs() {
        return Err(ParseError::new(
            "decimal",
            raw,
            format!(
                "needs more than {precision} digits at scale {}",
                value.scale
            ),
        ));
    }
    Ok(())
}

/// `10^digits`, the smallest magnitude that no longer fits in `digits`.
fn max_unscaled(digits: u32) -> i128 {
    10i128.pow(digits.min(MAX_DECIMAL_DIGITS))
}

fn digits_value(digits: &str) -> Option<i128> {
    digits.bytes().try_fold(0i128, |acc, b| {
        acc.checked_mul(10)?.checked_add(i128::from(b - b'0'))
    })
}
