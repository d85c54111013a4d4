// ABOUTME: PostgreSQL to ClickHouse type mapping and CREATE TABLE generation
// ABOUTME: Closed mapping table; unmapped types are rejected, never guessed

use crate::error::{EtlError, Result};
use crate::utils::{quote_ident, quote_qualified};

use super::value::Column;

/// Source `data_type` names (as reported by `information_schema.columns`)
/// and the ClickHouse type each one is created as.
const TYPE_MAP: &[(&str, &str)] = &[
    ("smallint", "Int16"),
    ("integer", "Int32"),
    ("bigint", "Int64"),
    ("real", "Float32"),
    ("double precision", "Float64"),
    ("numeric", "Float64"),
    ("boolean", "Bool"),
    ("text", "String"),
    ("character varying", "String"),
    ("character", "String"),
    ("name", "String"),
    ("uuid", "UUID"),
    ("bytea", "String"),
    ("date", "Date"),
    ("time without time zone", "String"),
    ("timestamp without time zone", "DateTime64(6)"),
    ("timestamp with time zone", "DateTime64(6, 'UTC')"),
    ("json", "String"),
    ("jsonb", "String"),
];

/// Table engine clause: plain MergeTree with no sorting key.
const TABLE_ENGINE: &str = "ENGINE = MergeTree() ORDER BY tuple()";

/// A column paired with the destination type it will be created as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedColumn {
    pub name: String,
    pub destination_type: String,
}

/// Look up the ClickHouse type for a source type name.
pub fn destination_type(declared_type: &str) -> Option<&'static str> {
    TYPE_MAP
        .iter()
        .find(|(source, _)| *source == declared_type)
        .map(|(_, dest)| *dest)
}

/// Map every column to its destination type, preserving order.
///
/// # Errors
///
/// Returns [`EtlError::TypeMapping`] for the first column whose declared
/// type is not in the mapping table.
pub fn map_types(columns: &[Column]) -> Result<Vec<MappedColumn>> {
    columns
        .iter()
        .map(|col| {
            let base = destination_type(&col.declared_type).ok_or_else(|| {
                EtlError::TypeMapping {
                    column: col.name.clone(),
                    declared_type: col.declared_type.clone(),
                }
            })?;
            let destination_type = if col.nullable {
                format!("Nullable({})", base)
            } else {
                base.to_string()
            };
            Ok(MappedColumn {
                name: col.name.clone(),
                destination_type,
            })
        })
        .collect()
}

/// Build an idempotent CREATE TABLE statement for the destination
///
/// Generates a statement like:
/// ```sql
/// CREATE TABLE IF NOT EXISTS "users" ("id" Int32, "name" Nullable(String))
/// ENGINE = MergeTree() ORDER BY tuple()
/// ```
///
/// # Errors
///
/// - [`EtlError::Validation`] if `columns` is empty
/// - [`EtlError::TypeMapping`] if any column type is unmapped
pub fn build_create_table_statement(table: &str, columns: &[Column]) -> Result<String> {
    if columns.is_empty() {
        return Err(EtlError::Validation(format!(
            "no columns to create table {}",
            table
        )));
    }

    let mapped = map_types(columns)?;
    let definitions: Vec<String> = mapped
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.destination_type))
        .collect();

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({}) {}",
        quote_qualified(table),
        definitions.join(", "),
        TABLE_ENGINE
    ))
}
