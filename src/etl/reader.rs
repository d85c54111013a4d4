// ABOUTME: Source schema and row extraction - full scans and watermark-bounded scans
// ABOUTME: Decodes PostgreSQL rows into tagged values aligned with catalog column order

use async_trait::async_trait;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row};

use crate::error::{EtlError, Result};
use crate::utils::{quote_ident, quote_qualified, split_qualified};

use super::typemap;
use super::value::{format_uuid, Column, TableSnapshot, Value, Watermark, TIMESTAMP_FORMAT};

/// Read access to a row-oriented source.
///
/// Implemented by [`PostgresSource`]; tests substitute in-memory doubles.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Column metadata in physical (ordinal) order.
    async fn describe_columns(&self, table: &str) -> Result<Vec<Column>>;

    /// Run a query with positional parameters and return tagged rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>>;
}

/// A PostgreSQL connection used as the extraction source.
pub struct PostgresSource {
    client: Client,
}

impl PostgresSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Open a connection to the source database.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = crate::postgres::connect(url).await?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl SourceReader for PostgresSource {
    async fn describe_columns(&self, table: &str) -> Result<Vec<Column>> {
        let (schema, table_name) = split_qualified(table);

        let rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text
                 FROM information_schema.columns
                 WHERE table_schema::text = COALESCE($1::text, current_schema()::text)
                   AND table_name::text = $2::text
                 ORDER BY ordinal_position",
                &[&schema, &table_name],
            )
            .await
            .map_err(|e| {
                EtlError::Query(format!("failed to query columns for {}: {}", table, e))
            })?;

        Ok(rows
            .iter()
            .map(|row| Column {
                name: row.get(0),
                declared_type: row.get(1),
                nullable: row.get::<_, String>(2) == "YES",
            })
            .collect())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let boxed: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(value_to_sql).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|v| v.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self.client.query(sql, &refs).await?;
        rows.iter().map(decode_row).collect()
    }
}

fn value_to_sql(value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Text(s) => Box::new(s.clone()),
        Value::Integer(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Decimal(d) => Box::new(*d),
        Value::Timestamp(ts) => Box::new(*ts),
        Value::Binary(bytes) => Box::new(bytes.clone()),
        Value::Null => Box::new(None::<String>),
    }
}

fn decode_row(row: &Row) -> Result<Vec<Value>> {
    (0..row.len()).map(|idx| decode_cell(row, idx)).collect()
}

/// Decode one cell according to its wire type.
fn decode_cell(row: &Row, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let decoded: std::result::Result<Option<Value>, tokio_postgres::Error> = match column.type_() {
        &Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map(|v| v.map(|b| Value::Integer(i64::from(b)))),
        &Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| v.map(|n| Value::Integer(i64::from(n)))),
        &Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| v.map(|n| Value::Integer(i64::from(n)))),
        &Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::Integer)),
        &Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|v| v.map(|f| Value::Float(f64::from(f)))),
        &Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(Value::Float)),
        &Type::NUMERIC => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .map(|v| v.map(Value::Decimal)),
        &Type::TEXT | &Type::VARCHAR | &Type::BPCHAR | &Type::NAME => {
            row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::Text))
        }
        &Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map(|v| v.map(|u| Value::Binary(u.as_bytes().to_vec()))),
        &Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map(|v| v.map(Value::Binary)),
        &Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|v| v.map(Value::Timestamp)),
        &Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map(|v| v.map(|ts| Value::Timestamp(ts.naive_utc()))),
        &Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map(|v| v.map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))),
        &Type::TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map(|v| v.map(|t| Value::Text(t.format("%H:%M:%S%.6f").to_string()))),
        &Type::JSON | &Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| v.map(|j| Value::Text(j.to_string()))),
        other => {
            return Err(EtlError::Query(format!(
                "unsupported value type '{}' in column '{}'",
                other.name(),
                column.name()
            )))
        }
    };

    let value = decoded.map_err(|e| {
        EtlError::Query(format!(
            "failed to decode column '{}': {}",
            column.name(),
            e
        ))
    })?;
    Ok(value.unwrap_or(Value::Null))
}

/// Read ordered column metadata for a table.
pub async fn describe_columns<S>(source: &S, table: &str) -> Result<Vec<Column>>
where
    S: SourceReader + ?Sized,
{
    if table.trim().is_empty() {
        return Err(EtlError::validation("table name cannot be empty"));
    }
    let columns = source.describe_columns(table).await?;
    tracing::debug!("Found {} columns in {}", columns.len(), table);
    Ok(columns)
}

/// Build `SELECT * FROM <table> [LIMIT $1]`. A limit of zero or less is
/// unbounded.
pub fn build_full_scan_query(table: &str, limit: i64) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT * FROM {}", quote_qualified(table));
    let mut params = Vec::new();
    if limit > 0 {
        sql.push_str(" LIMIT $1");
        params.push(Value::Integer(limit));
    }
    (sql, params)
}

/// Build the incremental scan for rows past the watermark
///
/// Generates a query like:
/// ```sql
/// SELECT * FROM "events" WHERE "id" > CAST(CAST($1 AS text) AS integer)
/// ORDER BY "id" ASC LIMIT $2
/// ```
///
/// The watermark is bound as its lossless text form and cast back to the
/// delta column's declared type on the server. An unset watermark drops the
/// WHERE clause; the ORDER BY is always present because watermark
/// advancement depends on ascending delivery.
pub fn build_incremental_query(
    table: &str,
    delta: &Column,
    watermark: &Watermark,
    limit: i64,
) -> Result<(String, Vec<Value>)> {
    // The declared type is interpolated into the CAST, so it must be one we know
    if typemap::destination_type(&delta.declared_type).is_none() {
        return Err(EtlError::TypeMapping {
            column: delta.name.clone(),
            declared_type: delta.declared_type.clone(),
        });
    }

    let delta_ident = quote_ident(&delta.name);
    let mut sql = format!("SELECT * FROM {}", quote_qualified(table));
    let mut params = Vec::new();

    if let Some(text) = watermark.value().and_then(|v| watermark_text(delta, v)) {
        params.push(Value::Text(text));
        sql.push_str(&format!(
            " WHERE {} > CAST(CAST(${} AS text) AS {})",
            delta_ident,
            params.len(),
            delta.declared_type
        ));
    }

    sql.push_str(&format!(" ORDER BY {} ASC", delta_ident));

    if limit > 0 {
        params.push(Value::Integer(limit));
        sql.push_str(&format!(" LIMIT ${}", params.len()));
    }

    Ok((sql, params))
}

/// Text a watermark value is bound as for the server-side CAST.
///
/// `timestamp with time zone` values are held as naive UTC, so they carry an
/// explicit `+00` offset; without it the server reads them in the session's
/// time zone.
fn watermark_text(delta: &Column, value: &Value) -> Option<String> {
    match value {
        Value::Timestamp(ts) if delta.declared_type == "timestamp with time zone" => {
            Some(format!("{}+00", ts.format(TIMESTAMP_FORMAT)))
        }
        other => other.to_text(),
    }
}

/// Full scan of a table, optionally limited
///
/// # Arguments
///
/// * `source` - Source to read from
/// * `table` - Table name, optionally `schema.table`
/// * `limit` - Maximum rows to return; zero or less means all rows
///
/// # Returns
///
/// A fresh snapshot. An empty table yields zero rows with the full column
/// list.
pub async fn extract_all<S>(source: &S, table: &str, limit: i64) -> Result<TableSnapshot>
where
    S: SourceReader + ?Sized,
{
    let columns = describe_columns(source, table).await?;
    let (sql, params) = build_full_scan_query(table, limit);

    tracing::debug!("Extracting {} with: {}", table, sql);
    let rows = source.query(&sql, &params).await?;
    into_snapshot(columns, rows)
}

/// Incremental scan of rows whose delta column is past the watermark
///
/// Rows come back in ascending delta order.
///
/// # Errors
///
/// - [`EtlError::Validation`] if the delta column does not exist
/// - [`EtlError::TypeMapping`] if the delta column's type is unknown
/// - Connection/query errors from the source
pub async fn extract_since<S>(
    source: &S,
    table: &str,
    delta_column: &str,
    watermark: &Watermark,
    limit: i64,
) -> Result<TableSnapshot>
where
    S: SourceReader + ?Sized,
{
    let columns = describe_columns(source, table).await?;
    let delta = columns
        .iter()
        .find(|c| c.name == delta_column)
        .ok_or_else(|| {
            EtlError::Validation(format!(
                "delta column '{}' not found in table {}",
                delta_column, table
            ))
        })?;

    let (sql, params) = build_incremental_query(table, delta, watermark, limit)?;

    tracing::debug!("Extracting {} since {} with: {}", table, watermark, sql);
    let rows = source.query(&sql, &params).await?;
    into_snapshot(columns, rows)
}

/// Check row widths and render UUID-like binary values as text.
fn into_snapshot(columns: Vec<Column>, mut rows: Vec<Vec<Value>>) -> Result<TableSnapshot> {
    for row in rows.iter_mut() {
        if row.len() != columns.len() {
            return Err(EtlError::Query(format!(
                "row has {} values but table has {} columns",
                row.len(),
                columns.len()
            )));
        }
        for (value, column) in row.iter_mut().zip(columns.iter()) {
            if !column.is_uuid_like() {
                continue;
            }
            if let Value::Binary(bytes) = value {
                if let Some(uuid) = format_uuid(bytes) {
                    *value = Value::Text(uuid);
                }
            }
        }
    }
    Ok(TableSnapshot::new(columns, rows))
}
