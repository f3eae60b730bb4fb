//! Batched idempotent writes.
//!
//! Rows are written in fixed-size batches, one multi-row upsert statement
//! per batch built from per-column `UNNEST` arrays. Conflicts on the
//! primary key overwrite the existing row, so re-running an import is safe.
//! Batches are independent: a failure is recorded and the remaining batches
//! still run.

use sqlx::PgPool;
use thiserror::Error;

use crate::import::mapper::{ColumnValue, MappedRow};
use crate::import::report::BatchResult;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Errors that fail a single batch.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unsafe identifier `{0}`")]
    UnsafeIdentifier(String),
    #[error("column {column} mixes {expected} and {found} values")]
    MixedTypes {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("batch contains a row without a primary key value")]
    MissingPrimaryKey,
}

pub struct BatchLoader<'a> {
    pool: &'a PgPool,
    batch_size: usize,
}

impl<'a> BatchLoader<'a> {
    pub fn new(pool: &'a PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Write rows to `table` in batches, upserting on `pk_column`.
    /// One `BatchResult` per batch; a failed batch never stops later ones.
    pub async fn load(
        &self,
        table: &str,
        pk_column: &str,
        rows: &[MappedRow],
    ) -> Vec<BatchResult> {
        let total = rows.len().div_ceil(self.batch_size);
        let mut results = Vec::with_capacity(total);

        for (idx, chunk) in rows.chunks(self.batch_size).enumerate() {
            match self.upsert_batch(table, pk_column, chunk).await {
                Ok(()) => {
                    log::debug!(
                        "wrote batch {}/{} ({} rows) into {}",
                        idx + 1,
                        total,
                        chunk.len(),
                        table
                    );
                    results.push(BatchResult::ok(chunk.len()));
                }
                Err(err) => {
                    log::warn!("batch {}/{} into {} failed: {err}", idx + 1, total, table);
                    results.push(BatchResult::failed(chunk.len(), err.to_string()));
                }
            }
        }
        results
    }

    async fn upsert_batch(
        &self,
        table: &str,
        pk_column: &str,
        rows: &[MappedRow],
    ) -> Result<(), LoadError> {
        let columns = batch_columns(pk_column, rows)?;
        let sql = build_upsert_sql(table, pk_column, &columns)?;

        let mut query = sqlx::query(&sql);
        for column in &columns {
            query = match &column.values {
                ColumnArray::Text(values) => query.bind(values),
                ColumnArray::Number(values) => query.bind(values),
                ColumnArray::Timestamp(values) => query.bind(values),
                ColumnArray::Bool(values) => query.bind(values),
            };
        }
        query.execute(self.pool).await?;
        Ok(())
    }
}

enum ColumnArray {
    Text(Vec<Option<String>>),
    Number(Vec<Option<f64>>),
    Timestamp(Vec<Option<chrono::DateTime<chrono::Utc>>>),
    Bool(Vec<Option<bool>>),
}

impl ColumnArray {
    fn for_sample(sample: &ColumnValue, capacity: usize) -> Self {
        match sample {
            ColumnValue::Text(_) => ColumnArray::Text(Vec::with_capacity(capacity)),
            ColumnValue::Number(_) => ColumnArray::Number(Vec::with_capacity(capacity)),
            ColumnValue::Timestamp(_) => ColumnArray::Timestamp(Vec::with_capacity(capacity)),
            ColumnValue::Bool(_) => ColumnArray::Bool(Vec::with_capacity(capacity)),
        }
    }

    fn push(&mut self, value: Option<&ColumnValue>, column: &str) -> Result<(), LoadError> {
        match (&mut *self, value) {
            (ColumnArray::Text(values), Some(ColumnValue::Text(s))) => {
                values.push(Some(s.clone()))
            }
            (ColumnArray::Text(values), None) => values.push(None),
            (ColumnArray::Number(values), Some(ColumnValue::Number(n))) => values.push(Some(*n)),
            (ColumnArray::Number(values), None) => values.push(None),
            (ColumnArray::Timestamp(values), Some(ColumnValue::Timestamp(ts))) => {
                values.push(Some(*ts))
            }
            (ColumnArray::Timestamp(values), None) => values.push(None),
            (ColumnArray::Bool(values), Some(ColumnValue::Bool(b))) => values.push(Some(*b)),
            (ColumnArray::Bool(values), None) => values.push(None),
            (array, Some(value)) => {
                return Err(LoadError::MixedTypes {
                    column: column.to_string(),
                    expected: array.kind(),
                    found: value.kind(),
                });
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        match self {
            ColumnArray::Text(_) => "text",
            ColumnArray::Number(_) => "number",
            ColumnArray::Timestamp(_) => "timestamp",
            ColumnArray::Bool(_) => "boolean",
        }
    }

    fn sql_cast(&self) -> &'static str {
        match self {
            ColumnArray::Text(_) => "text",
            ColumnArray::Number(_) => "float8",
            ColumnArray::Timestamp(_) => "timestamptz",
            ColumnArray::Bool(_) => "boolean",
        }
    }
}

struct BatchColumn {
    name: String,
    values: ColumnArray,
}

/// Shape a batch into per-column arrays: the column set is the union across
/// rows (primary key first), each column typed from its first present value.
fn batch_columns(pk_column: &str, rows: &[MappedRow]) -> Result<Vec<BatchColumn>, LoadError> {
    let mut names: Vec<&str> = vec![pk_column];
    for row in rows {
        for (name, _) in row.columns() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        if !is_safe_identifier(name) {
            return Err(LoadError::UnsafeIdentifier(name.to_string()));
        }
        let Some(sample) = rows.iter().find_map(|row| row.get(name)) else {
            // only reachable for the primary key, which every mapped row carries
            return Err(LoadError::MissingPrimaryKey);
        };
        let mut array = ColumnArray::for_sample(sample, rows.len());
        for row in rows {
            array.push(row.get(name), name)?;
        }
        columns.push(BatchColumn {
            name: name.to_string(),
            values: array,
        });
    }
    Ok(columns)
}

fn build_upsert_sql(
    table: &str,
    pk_column: &str,
    columns: &[BatchColumn],
) -> Result<String, LoadError> {
    if !is_safe_identifier(table) {
        return Err(LoadError::UnsafeIdentifier(table.to_string()));
    }

    let column_list = columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let unnest_args = columns
        .iter()
        .enumerate()
        .map(|(idx, c)| format!("${}::{}[]", idx + 1, c.values.sql_cast()))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| c.name != pk_column)
        .map(|c| format!("{} = EXCLUDED.{}", c.name, c.name))
        .collect::<Vec<_>>();
    let conflict = if updates.is_empty() {
        format!("ON CONFLICT ({pk_column}) DO NOTHING")
    } else {
        format!(
            "ON CONFLICT ({pk_column}) DO UPDATE SET {}",
            updates.join(", ")
        )
    };

    Ok(format!(
        "INSERT INTO {table} ({column_list}) SELECT * FROM UNNEST({unnest_args}) {conflict}"
    ))
}

pub(crate) fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
