//! Per-field type resolution with job-scoped memo tables.
//!
//! [`TypeResolver`] answers three questions about a field: its effective base
//! type, its logical type, and its decimal scale. Each answer is computed on
//! first request and cached by field name for the rest of the job; the three
//! tables fill independently so a field that is only ever asked for its base
//! type never has its scale looked up.
//!
//! A resolver belongs to exactly one job. It is handed to the row converter
//! explicitly and never shared between jobs.

use std::{collections::HashMap, fmt};

use crate::schema::{BaseType, Field, FieldType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Date,
    TimestampMillis,
    Decimal,
    /// Any annotation the coercer has no rule for (e.g. `time-millis`).
    Other(String),
}

impl LogicalType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "date" => LogicalType::Date,
            "timestamp-millis" => LogicalType::TimestampMillis,
            "decimal" => LogicalType::Decimal,
            other => LogicalType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LogicalType::Date => "date",
            LogicalType::TimestampMillis => "timestamp-millis",
            LogicalType::Decimal => "decimal",
            LogicalType::Other(name) => name,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the coercer needs to know about one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub base_type: BaseType,
    pub logical_type: Option<LogicalType>,
    /// Present only when the logical type is `decimal`.
    pub decimal_scale: Option<u32>,
    /// Declared digit count of a decimal field, when the schema gives one.
    pub decimal_precision: Option<u32>,
}

#[derive(Debug, Default)]
pub struct TypeResolver {
    base_types: HashMap<String, BaseType>,
    logical_types: HashMap<String, Option<LogicalType>>,
    decimal_scales: HashMap<String, u32>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, field: &Field) -> ResolvedField {
        let base_type = self.base_type(field);
        let logical_type = self.logical_type(field);
        let (decimal_scale, decimal_precision) = match logical_type {
            Some(LogicalType::Decimal) => (
                Some(self.decimal_scale(field)),
                field.effective_node().and_then(|node| node.precision),
            ),
            _ => (None, None),
        };
        ResolvedField {
            base_type,
            logical_type,
            decimal_scale,
            decimal_precision,
        }
    }

    /// Base type of the field, or of the first non-null member of a union.
    /// A union made only of `null` stays [`BaseType::Union`].
    pub fn base_type(&mut self, field: &Field) -> BaseType {
        if let Some(cached) = self.base_types.get(&field.name) {
            return *cached;
        }
        let base = match &field.field_type {
            FieldType::Single(node) => node.base,
            FieldType::Union(_) => field
                .effective_node()
                .map(|node| node.base)
                .unwrap_or(BaseType::Union),
        };
        self.base_types.insert(field.name.clone(), base);
        base
    }

    pub fn logical_type(&mut self, field: &Field) -> Option<LogicalType> {
        if let Some(cached) = self.logical_types.get(&field.name) {
            return cached.clone();
        }
        let logical = field
            .effective_node()
            .and_then(|node| node.logical_type.as_deref())
            .map(LogicalType::from_name);
        self.logical_types
            .insert(field.name.clone(), logical.clone());
        logical
    }

    /// Scale declared on the effective node; `0` when the field is not a
    /// decimal or declares no scale.
    pub fn decimal_scale(&mut self, field: &Field) -> u32 {
        if let Some(cached) = self.decimal_scales.get(&field.name) {
            return *cached;
        }
        let scale = field
            .effective_node()
            .filter(|node| node.logical_type.as_deref() == Some("decimal"))
            .and_then(|node| node.scale)
            .unwrap_or(0);
        self.decimal_scales.insert(field.name.clone(), scale);
        scale
    }

    pub fn cached_fields(&self) -> usize {
        self.base_types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeNode;

    fn union(name: &str, members: Vec<TypeNode>) -> Field {
        Field::new(name, 0, FieldType::Union(members))
    }

    #[test]
    fn plain_field_reads_node_directly() {
        let field = Field::new(
            "ts",
            0,
            FieldType::Single(TypeNode::primitive(BaseType::Long).with_logical_type("timestamp-millis")),
        );
        let mut resolver = TypeResolver::new();
        let resolved = resolver.resolve(&field);
        assert_eq!(resolved.base_type, BaseType::Long);
        assert_eq!(resolved.logical_type, Some(LogicalType::TimestampMillis));
        assert_eq!(resolved.decimal_scale, None);
        assert_eq!(resolved.decimal_precision, None);
    }

    #[test]
    fn union_uses_first_non_null_member() {
        let field = union(
            "amount",
            vec![
                TypeNode::primitive(BaseType::Null),
                TypeNode::decimal(BaseType::Bytes, 9, 3),
                TypeNode::primitive(BaseType::String),
            ],
        );
        let mut resolver = TypeResolver::new();
        let resolved = resolver.resolve(&field);
        assert_eq!(resolved.base_type, BaseType::Bytes);
        assert_eq!(resolved.logical_type, Some(LogicalType::Decimal));
        assert_eq!(resolved.decimal_scale, Some(3));
        assert_eq!(resolved.decimal_precision, Some(9));
    }

    #[test]
    fn null_only_union_stays_union() {
        let field = union("nothing", vec![TypeNode::primitive(BaseType::Null)]);
        let mut resolver = TypeResolver::new();
        assert_eq!(resolver.base_type(&field), BaseType::Union);
        assert_eq!(resolver.logical_type(&field), None);
    }

    #[test]
    fn answers_are_memoized_by_field_name() {
        let first = Field::new("x", 0, FieldType::Single(TypeNode::primitive(BaseType::Int)));
        let mut resolver = TypeResolver::new();
        assert_eq!(resolver.base_type(&first), BaseType::Int);

        // A different definition under the same name still gets the cached answer.
        let redefined = Field::new("x", 0, FieldType::Single(TypeNode::primitive(BaseType::String)));
        assert_eq!(resolver.base_type(&redefined), BaseType::Int);
        assert_eq!(resolver.cached_fields(), 1);
    }

    #[test]
    fn scale_is_not_looked_up_for_non_decimals() {
        let field = Field::new("n", 0, FieldType::Single(TypeNode::primitive(BaseType::Double)));
        let mut resolver = TypeResolver::new();
        resolver.resolve(&field);
        assert!(resolver.decimal_scales.is_empty());
    }

    #[test]
    fn unknown_logical_type_is_preserved() {
        let field = Field::new(
            "t",
            0,
            FieldType::Single(TypeNode::primitive(BaseType::Int).with_logical_type("time-millis")),
        );
        let mut resolver = TypeResolver::new();
        assert_eq!(
            resolver.logical_type(&field),
            Some(LogicalType::Other("time-millis".to_string()))
        );
    }
}
