//! Run configuration.
//!
//! One `ImportConfig` is built in `main` (defaults, or a JSON plan file,
//! plus CLI overrides), validated once, and passed by reference into the
//! pipeline. Stages never consult the environment themselves.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::ImportError;
use crate::import::delimited::DEFAULT_DELIMITER;
use crate::import::loader::{self, DEFAULT_BATCH_SIZE};
use crate::import::sections::canonical_tag;

/// What to do with a date value nothing can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatePolicy {
    /// Drop the value with a warning; the column default applies.
    #[default]
    NullOnError,
    /// Abort the run on the first unparseable date.
    Strict,
}

/// One entity type: which section feeds which table.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityPlan {
    /// Section tag in the export document (matched case-insensitively).
    pub entity: String,
    /// Target table name.
    pub table: String,
    /// Conflict key for upserts.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

impl EntityPlan {
    pub fn new(entity: &str, table: &str) -> Self {
        Self {
            entity: entity.to_string(),
            table: table.to_string(),
            primary_key: default_primary_key(),
        }
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_delimiter() -> char {
    DEFAULT_DELIMITER
}

/// Static configuration for one run. Entity order is load order: operators
/// list parent entities before dependents.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub date_policy: DatePolicy,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    pub plan: Vec<EntityPlan>,
}

impl ImportConfig {
    /// The built-in plan for the legacy operations export.
    pub fn default_plan() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            date_policy: DatePolicy::default(),
            delimiter: DEFAULT_DELIMITER,
            plan: vec![
                EntityPlan::new("CLIENTS", "clients"),
                EntityPlan::new("PROJECTS", "projects"),
                EntityPlan::new("TIME ENTRIES", "time_entries"),
                EntityPlan::new("ENGAGEMENT TERMS", "engagement_terms"),
                EntityPlan::new("INVOICES", "invoices"),
            ],
        }
    }

    /// Read a plan file. The result still needs [`ImportConfig::validated`].
    pub fn from_json_file(path: &Path) -> Result<Self, ImportError> {
        let text = std::fs::read_to_string(path).map_err(|source| ImportError::PlanRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ImportError::PlanParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Canonicalize entity tags and reject configurations the pipeline
    /// cannot execute safely.
    pub fn validated(mut self) -> Result<Self, ImportError> {
        if self.plan.is_empty() {
            return Err(ImportError::InvalidPlan(
                "plan declares no entity types".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ImportError::InvalidPlan(
                "batch size must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &mut self.plan {
            entry.entity = canonical_tag(&entry.entity);
            if entry.entity.is_empty() {
                return Err(ImportError::InvalidPlan(
                    "entity tag must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.entity.clone()) {
                return Err(ImportError::InvalidPlan(format!(
                    "entity {} declared twice",
                    entry.entity
                )));
            }
            if !loader::is_safe_identifier(&entry.table) {
                return Err(ImportError::InvalidPlan(format!(
                    "invalid table name `{}`",
                    entry.table
                )));
            }
            if !loader::is_safe_identifier(&entry.primary_key) {
                return Err(ImportError::InvalidPlan(format!(
                    "invalid primary key column `{}`",
                    entry.primary_key
                )));
            }
        }
        Ok(self)
    }
}
