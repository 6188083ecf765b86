use chrono::{FixedOffset, NaiveDate};
use csv_to_parquet::{
    coerce::{MILLIS_PER_DAY, TimeZoneSetting, ValueCoercer, parse_decimal},
    data::TypedValue,
    resolver::{LogicalType, ResolvedField},
    schema::BaseType,
};
use proptest::prelude::*;

fn fixed(hours: i32) -> ValueCoercer {
    ValueCoercer::new(TimeZoneSetting::Fixed(
        FixedOffset::east_opt(hours * 3600).expect("offset"),
    ))
}

fn plain(base_type: BaseType) -> ResolvedField {
    ResolvedField {
        base_type,
        logical_type: None,
        decimal_scale: None,
        decimal_precision: None,
    }
}

fn logical(base_type: BaseType, logical_type: LogicalType, scale: Option<u32>) -> ResolvedField {
    ResolvedField {
        base_type,
        logical_type: Some(logical_type),
        decimal_scale: scale,
        decimal_precision: None,
    }
}

fn decimal(precision: u32, scale: u32) -> ResolvedField {
    ResolvedField {
        decimal_precision: Some(precision),
        ..logical(BaseType::Bytes, LogicalType::Decimal, Some(scale))
    }
}

#[test]
fn numeric_garbage_becomes_zero() {
    let coercer = fixed(0);
    let cases = [
        (BaseType::Int, TypedValue::Int(0)),
        (BaseType::Long, TypedValue::Long(0)),
        (BaseType::Float, TypedValue::Float(0.0)),
        (BaseType::Double, TypedValue::Double(0.0)),
    ];
    for (base, zero) in cases {
        for raw in ["abc", "1.2.3", "12abc", "--1"] {
            let value = coercer.coerce(raw, &plain(base)).expect("never fails");
            assert_eq!(value, Some(zero.clone()), "{base} from {raw:?}");
        }
    }
}

#[test]
fn empty_text_leaves_every_type_unset() {
    let coercer = fixed(0);
    let fields = [
        plain(BaseType::Boolean),
        plain(BaseType::Int),
        plain(BaseType::String),
        plain(BaseType::Bytes),
        logical(BaseType::Int, LogicalType::Date, None),
        logical(BaseType::Long, LogicalType::TimestampMillis, None),
        logical(BaseType::Bytes, LogicalType::Decimal, Some(2)),
    ];
    for field in fields {
        assert_eq!(coercer.coerce("", &field).unwrap(), None);
    }
}

#[test]
fn date_resolves_to_epoch_day() {
    let date = logical(BaseType::Int, LogicalType::Date, None);
    for hours in [-11, -3, 0, 5, 12] {
        assert_eq!(
            fixed(hours).coerce("2020-03-01", &date).unwrap(),
            Some(TypedValue::Date(18322))
        );
    }
    assert!(fixed(0).coerce("not-a-date", &date).is_err());
    assert!(fixed(0).coerce("2020-02-30", &date).is_err());
}

#[test]
fn timestamps_carry_the_offset() {
    let timestamp = logical(BaseType::Long, LogicalType::TimestampMillis, None);
    let wall_clock = 18322 * MILLIS_PER_DAY + 13 * 3_600_000;
    for hours in [-3, 0, 9] {
        assert_eq!(
            fixed(hours).coerce("2020-03-01 13:00:00", &timestamp).unwrap(),
            Some(TypedValue::TimestampMillis(wall_clock))
        );
    }
    let err = fixed(0).coerce("2020-03-01T13:00", &timestamp).unwrap_err();
    assert_eq!(err.expected, "timestamp");
}

#[test]
fn decimals_round_away_from_zero() {
    let decimal = logical(BaseType::Bytes, LogicalType::Decimal, Some(2));
    let coercer = fixed(0);
    let value = coercer.coerce("10.005", &decimal).unwrap();
    let Some(TypedValue::Decimal(bytes)) = value else {
        panic!("expected decimal, got {value:?}");
    };
    assert_eq!(bytes.unscaled, vec![0x03, 0xE9]);
    assert_eq!(bytes.scale, 2);

    assert_eq!(parse_decimal("-10.005", 2).unwrap().to_i128().unwrap(), -1001);
    assert_eq!(parse_decimal("10.004", 2).unwrap().to_i128().unwrap(), 1001);
    assert_eq!(parse_decimal("10.001", 2).unwrap().to_i128().unwrap(), 1001);
    assert_eq!(parse_decimal("-10.001", 2).unwrap().to_i128().unwrap(), -1001);
    assert_eq!(parse_decimal("10.0000", 2).unwrap().to_i128().unwrap(), 1000);
    assert_eq!(parse_decimal("7", 2).unwrap().to_i128().unwrap(), 700);
    assert!(coercer.coerce("ten", &decimal).is_err());
}

#[test]
fn decimals_wider_than_declared_precision_fail() {
    let coercer = fixed(0);
    let narrow = decimal(9, 2);
    let err = coercer.coerce("12345678901.00", &narrow).unwrap_err();
    assert_eq!(err.expected, "decimal");
    assert_eq!(err.value, "12345678901.00");
    assert!(coercer.coerce("9999999.99", &narrow).unwrap().is_some());
    assert!(coercer.coerce("9999999.991", &narrow).is_err());
    assert!(coercer.coerce("-10000000", &narrow).is_err());
}

#[test]
fn wide_decimals_keep_the_field_scale() {
    let coercer = fixed(0);
    let wide = decimal(38, 10);
    let value = coercer.coerce("1234567890123456789012.5", &wide).unwrap();
    let Some(TypedValue::Decimal(bytes)) = value else {
        panic!("expected decimal, got {value:?}");
    };
    assert_eq!(bytes.scale, 10);
    assert_eq!(
        bytes.to_i128().unwrap(),
        12_345_678_901_234_567_890_125_000_000_000
    );
    assert_eq!(bytes.to_plain_text().unwrap(), "1234567890123456789012.5000000000");

    let widest = format!("{}.{}", "9".repeat(28), "9".repeat(10));
    assert!(coercer.coerce(&widest, &wide).unwrap().is_some());
    let err = coercer
        .coerce(&format!("1{widest}"), &wide)
        .unwrap_err();
    assert_eq!(err.expected, "decimal");
}

#[test]
fn hour_twelve_is_noon() {
    let timestamp = logical(BaseType::Long, LogicalType::TimestampMillis, None);
    let day = 18322 * MILLIS_PER_DAY;
    assert_eq!(
        fixed(0).coerce("2020-03-01 12:00:00", &timestamp).unwrap(),
        Some(TypedValue::TimestampMillis(day + 12 * 3_600_000))
    );
    assert_eq!(
        fixed(0).coerce("2020-03-01 00:00:00", &timestamp).unwrap(),
        Some(TypedValue::TimestampMillis(day))
    );
}

#[test]
fn booleans_are_permissive() {
    let coercer = fixed(0);
    let boolean = plain(BaseType::Boolean);
    for raw in ["true", "TRUE", "1", "yes", "Y", "on"] {
        assert_eq!(coercer.coerce(raw, &boolean).unwrap(), Some(TypedValue::Boolean(true)));
    }
    for raw in ["false", "0", "no", "maybe"] {
        assert_eq!(coercer.coerce(raw, &boolean).unwrap(), Some(TypedValue::Boolean(false)));
    }
}

#[test]
fn unsupported_types_are_dropped() {
    let coercer = fixed(0);
    assert_eq!(coercer.coerce("x", &plain(BaseType::Array)).unwrap(), None);
    assert_eq!(
        coercer
            .coerce("x", &logical(BaseType::Int, LogicalType::Other("time-millis".into()), None))
            .unwrap(),
        None
    );
}

proptest! {
    #[test]
    fn integers_round_trip(value in any::<i64>()) {
        let coercer = fixed(0);
        prop_assert_eq!(
            coercer.coerce(&value.to_string(), &plain(BaseType::Long)).unwrap(),
            Some(TypedValue::Long(value))
        );
        let narrow = value as i32;
        prop_assert_eq!(
            coercer.coerce(&narrow.to_string(), &plain(BaseType::Int)).unwrap(),
            Some(TypedValue::Int(narrow))
        );
    }

    #[test]
    fn decimals_always_land_on_the_field_scale(
        whole in -1_000_000i64..1_000_000,
        fraction in 0u32..100_000,
        scale in 0u32..6
    ) {
        let raw = format!("{whole}.{fraction:05}");
        let bytes = parse_decimal(&raw, scale).unwrap();
        prop_assert_eq!(bytes.scale, scale);
        let decimal = bytes.to_decimal().unwrap();
        prop_assert_eq!(decimal.scale(), scale);
        let exact: rust_decimal::Decimal = raw.parse().unwrap();
        let step = rust_decimal::Decimal::new(1, scale);
        // Rounding only ever moves away from zero, by less than one step.
        prop_assert!((decimal - exact).abs() < step);
        prop_assert!(decimal.abs() >= exact.abs());
    }

    #[test]
    fn wide_decimals_are_exact_or_rejected(
        digits in "[1-9][0-9]{0,39}",
        point in 0usize..40,
        scale in 0u32..=38,
        negative in any::<bool>()
    ) {
        let point = point.min(digits.len());
        let (whole, fraction) = digits.split_at(digits.len() - point);
        let sign = if negative { "-" } else { "" };
        let raw = format!("{sign}{}.{fraction}", if whole.is_empty() { "0" } else { whole });
        match parse_decimal(&raw, scale) {
            Ok(bytes) => {
                prop_assert_eq!(bytes.scale, scale);
                let unscaled = bytes.to_i128().unwrap();
                prop_assert!(unscaled.unsigned_abs() < 10u128.pow(38));
                prop_assert_eq!(unscaled < 0, negative);
                if fraction.len() <= scale as usize {
                    let padded = format!("{digits}{}", "0".repeat(scale as usize - fraction.len()));
                    prop_assert_eq!(unscaled.unsigned_abs().to_string(), padded);
                }
            }
            Err(err) => prop_assert_eq!(err.expected, "decimal"),
        }
    }

    #[test]
    fn dates_match_calendar_arithmetic(days in -20_000i32..40_000, hours in -11i32..=12) {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let date = epoch + chrono::Duration::days(i64::from(days));
        let raw = date.format("%Y-%m-%d").to_string();
        let field = logical(BaseType::Int, LogicalType::Date, None);
        prop_assert_eq!(
            fixed(hours).coerce(&raw, &field).unwrap(),
            Some(TypedValue::Date(days))
        );
    }
}
