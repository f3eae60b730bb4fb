use std::path::PathBuf;

use thiserror::Error;

use crate::import::mapper::MapRowError;

/// Fatal errors that abort a run.
///
/// Everything recoverable (malformed lines, failed batches, missing
/// sections) travels through warnings and `BatchResult`s instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read source document {}: {source}", path.display())]
    DocumentRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read import plan {}: {source}", path.display())]
    PlanRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse import plan {}: {source}", path.display())]
    PlanParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid import plan: {0}")]
    InvalidPlan(String),
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("mapping failed for {entity}: {source}")]
    Mapping {
        entity: String,
        #[source]
        source: MapRowError,
    },
}
