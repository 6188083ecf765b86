use anyhow::{Context, Result};
use log::info;

use crate::{cli::SchemaArgs, resolver::TypeResolver, schema::Schema, table};

pub const HEADERS: [&str; 5] = ["field", "base type", "logical type", "scale", "nullable"];

pub fn execute(args: &SchemaArgs) -> Result<()> {
    let schema = Schema::load(&args.schema)
        .with_context(|| format!("Loading schema from {:?}", args.schema))?;
    info!(
        "Schema '{}' defines {} field(s)",
        schema.name,
        schema.len()
    );
    table::print_table(&HEADERS, &describe(&schema));
    Ok(())
}

/// One row per field, in schema order, as the resolver sees it.
pub fn describe(schema: &Schema) -> Vec<Vec<String>> {
    let mut resolver = TypeResolver::new();
    schema
        .fields
        .iter()
        .map(|field| {
            let resolved = resolver.resolve(field);
            vec![
                field.name.clone(),
                resolved.base_type.to_string(),
                resolved
                    .logical_type
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                resolved
                    .decimal_scale
                    .map(|scale| scale.to_string())
                    .unwrap_or_default(),
                field.is_nullable().to_string(),
            ]
        })
        .collect()
}
