//! Output schema model and Avro JSON (`.avsc`) loading.
//!
//! A [`Schema`] is an ordered list of [`Field`]s. Field order is the output
//! column order and also the positional mapping into every raw input row, so
//! the loader preserves declaration order exactly.
//!
//! Each field carries its declared type as a [`FieldType`]: either a single
//! [`TypeNode`] or a union of nodes (typically `["null", ...]` to make the
//! field nullable). Logical-type annotations (`date`, `timestamp-millis`,
//! `decimal`) and the decimal `scale`/`precision` attributes stay on the node
//! that declares them; interpreting them is the resolver's job.

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConvertError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    Fixed,
    String,
    Record,
    Enum,
    Array,
    Map,
    Union,
    /// A named type reference or any type name this converter does not know.
    Other,
}

impl BaseType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "null" => BaseType::Null,
            "boolean" => BaseType::Boolean,
            "int" => BaseType::Int,
            "long" => BaseType::Long,
            "float" => BaseType::Float,
            "double" => BaseType::Double,
            "bytes" => BaseType::Bytes,
            "fixed" => BaseType::Fixed,
            "string" => BaseType::String,
            "record" => BaseType::Record,
            "enum" => BaseType::Enum,
            "array" => BaseType::Array,
            "map" => BaseType::Map,
            _ => BaseType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Null => "null",
            BaseType::Boolean => "boolean",
            BaseType::Int => "int",
            BaseType::Long => "long",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::Bytes => "bytes",
            BaseType::Fixed => "fixed",
            BaseType::String => "string",
            BaseType::Record => "record",
            BaseType::Enum => "enum",
            BaseType::Array => "array",
            BaseType::Map => "map",
            BaseType::Union => "union",
            BaseType::Other => "other",
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete type declaration, with its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeNode {
    pub base: BaseType,
    pub logical_type: Option<String>,
    pub scale: Option<u32>,
    pub precision: Option<u32>,
    pub size: Option<usize>,
}

impl TypeNode {
    pub fn primitive(base: BaseType) -> Self {
        Self {
            base,
            logical_type: None,
            scale: None,
            precision: None,
            size: None,
        }
    }

    pub fn with_logical_type(mut self, logical_type: &str) -> Self {
        self.logical_type = Some(logical_type.to_string());
        self
    }

    pub fn decimal(base: BaseType, precision: u32, scale: u32) -> Self {
        Self {
            base,
            logical_type: Some("decimal".to_string()),
            scale: Some(scale),
            precision: Some(precision),
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Single(TypeNode),
    Union(Vec<TypeNode>),
}

impl FieldType {
    pub fn base(&self) -> BaseType {
        match self {
            FieldType::Single(node) => node.base,
            FieldType::Union(_) => BaseType::Union,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub position: usize,
    pub field_type: FieldType,
    pub doc: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, position: usize, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            position,
            field_type,
            doc: None,
        }
    }

    /// The node that actually describes stored values: the node itself for a
    /// plain field, the first non-null member for a union.
    pub fn effective_node(&self) -> Option<&TypeNode> {
        match &self.field_type {
            FieldType::Single(node) => Some(node),
            FieldType::Union(members) => members.iter().find(|m| m.base != BaseType::Null),
        }
    }

    pub fn is_nullable(&self) -> bool {
        match &self.field_type {
            FieldType::Single(node) => node.base == BaseType::Null,
            FieldType::Union(members) => members.iter().any(|m| m.base == BaseType::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub namespace: Option<String>,
    pub fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    namespace: Option<String>,
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    field_type: Value,
    doc: Option<String>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            fields,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let value: Value = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| ConvertError::Schema(format!("{}: {err}", path.display())))?;
        Self::from_value(value)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| ConvertError::Schema(err.to_string()))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self> {
        let raw: RawRecord = serde_json::from_value(value)
            .map_err(|err| ConvertError::Schema(format!("expected a record schema: {err}")))?;
        if raw.kind != "record" {
            return Err(ConvertError::Schema(format!(
                "top-level type must be 'record', found '{}'",
                raw.kind
            )));
        }
        if raw.fields.is_empty() {
            return Err(ConvertError::Schema(format!(
                "record '{}' declares no fields",
                raw.name
            )));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(raw.fields.len());
        for (position, raw_field) in raw.fields.into_iter().enumerate() {
            if !seen.insert(raw_field.name.clone()) {
                return Err(ConvertError::Schema(format!(
                    "duplicate field name '{}'",
                    raw_field.name
                )));
            }
            let field_type = parse_field_type(&raw_field.field_type)
                .map_err(|msg| ConvertError::Schema(format!("field '{}': {msg}", raw_field.name)))?;
            fields.push(Field {
                name: raw_field.name,
                position,
                field_type,
                doc: raw_field.doc,
            });
        }

        Ok(Self {
            name: raw.name,
            namespace: raw.namespace,
            fields,
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

fn parse_field_type(value: &Value) -> std::result::Result<FieldType, String> {
    match value {
        Value::Array(members) => members
            .iter()
            .map(parse_node)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(FieldType::Union),
        other => parse_node(other).map(FieldType::Single),
    }
}

fn parse_node(value: &Value) -> std::result::Result<TypeNode, String> {
    match value {
        Value::String(name) => Ok(TypeNode::primitive(BaseType::from_name(name))),
        Value::Object(map) => {
            let mut node = match map.get("type") {
                Some(Value::String(name)) => TypeNode::primitive(BaseType::from_name(name)),
                Some(nested @ Value::Object(_)) => parse_node(nested)?,
                Some(Value::Array(_)) => {
                    return Err("nested unions are not supported".to_string());
                }
                _ => return Err("type declaration is missing 'type'".to_string()),
            };
            if let Some(logical) = map.get("logicalType").and_then(Value::as_str) {
                node.logical_type = Some(logical.to_string());
            }
            if let Some(scale) = map.get("scale") {
                node.scale = Some(numeric_attribute("scale", scale)?);
            }
            if let Some(precision) = map.get("precision") {
                node.precision = Some(numeric_attribute("precision", precision)?);
            }
            if let Some(size) = map.get("size") {
                node.size = Some(numeric_attribute("size", size)? as usize);
            }
            Ok(node)
        }
        other => Err(format!("unsupported type declaration {other}")),
    }
}

// Attributes are numbers in well-formed schemas, but numeric strings show up
// in hand-written ones and are accepted as well.
fn numeric_attribute(name: &str, value: &Value) -> std::result::Result<u32, String> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| format!("attribute '{name}' must be a non-negative integer, found {value}"))
}
