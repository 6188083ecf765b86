//! Row conversion: one raw text row in, one [`TypedRecord`] out.
//!
//! [`convert_row()`] walks the schema in field order, pulls the raw value at
//! each field's position, and coerces it with the job's resolver and
//! coercer. Every call builds a new record, so nothing carries over from the
//! previous row.

use crate::{
    coerce::ValueCoercer,
    data::TypedRecord,
    error::{ConvertError, Result},
    resolver::TypeResolver,
    schema::Schema,
};

pub fn convert_row(
    raw: &[String],
    schema: &Schema,
    resolver: &mut TypeResolver,
    coercer: &ValueCoercer,
) -> Result<TypedRecord> {
    ensure_row_shape(raw, schema)?;
    let values = schema
        .fields
        .iter()
        .map(|field| {
            let value = raw.get(field.position).map(String::as_str).unwrap_or("");
            let resolved = resolver.resolve(field);
            coercer
                .coerce(value, &resolved)
                .map_err(|err| ConvertError::Parse {
                    message: err.to_string(),
                    row: raw.join("|"),
                    field: field.name.clone(),
                    value: value.to_string(),
                })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TypedRecord::new(values))
}

/// Fails when `raw` has fewer values than the schema has fields. Extra
/// trailing columns are allowed.
pub fn ensure_row_shape(raw: &[String], schema: &Schema) -> Result<()> {
    if raw.len() < schema.len() {
        return Err(ConvertError::RowShape {
            expected: schema.len(),
            actual: raw.len(),
            row: raw.join("|"),
        });
    }
    Ok(())
}
