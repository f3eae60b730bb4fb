//! Run reporting types.
//!
//! Batch writes are best-effort: one failed batch neither rolls back nor
//! blocks the rest of the run. These types make that contract explicit to
//! callers instead of letting a bulk load look all-or-nothing.

use std::fmt;

/// Outcome of one batch write.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub attempted: usize,
    pub written: usize,
    pub error: Option<String>,
}

impl BatchResult {
    pub fn ok(attempted: usize) -> Self {
        Self {
            attempted,
            written: attempted,
            error: None,
        }
    }

    pub fn failed(attempted: usize, error: String) -> Self {
        Self {
            attempted,
            written: 0,
            error: Some(error),
        }
    }
}

/// Per-entity-type totals for one run.
#[derive(Debug, Clone, Default)]
pub struct EntityReport {
    pub entity: String,
    pub table: String,
    pub records_found: usize,
    pub records_mapped: usize,
    pub records_written: usize,
    pub batches: Vec<BatchResult>,
    pub warnings: Vec<String>,
}

impl EntityReport {
    pub fn new(entity: &str, table: &str) -> Self {
        Self {
            entity: entity.to_string(),
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.error.is_some()).count()
    }
}

/// The terminal artifact of a run. Printed and logged, never persisted.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub entities: Vec<EntityReport>,
}

impl RunReport {
    pub fn records_found(&self) -> usize {
        self.entities.iter().map(|e| e.records_found).sum()
    }

    pub fn records_written(&self) -> usize {
        self.entities.iter().map(|e| e.records_written).sum()
    }

    pub fn failed_batches(&self) -> usize {
        self.entities.iter().map(|e| e.failed_batches()).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.entities.iter().map(|e| e.warnings.len()).sum()
    }

    pub fn entity(&self, tag: &str) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.entity == tag)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import run summary:")?;
        for entity in &self.entities {
            writeln!(
                f,
                "  {} -> {}: {} found, {} mapped, {} written, {} failed batches",
                entity.entity,
                entity.table,
                entity.records_found,
                entity.records_mapped,
                entity.records_written,
                entity.failed_batches()
            )?;
            for warning in &entity.warnings {
                writeln!(f, "    warning: {warning}")?;
            }
            for batch in &entity.batches {
                if let Some(error) = &batch.error {
                    writeln!(f, "    batch of {} failed: {error}", batch.attempted)?;
                }
            }
        }
        writeln!(
            f,
            "  total: {} of {} records written, {} warnings",
            self.records_written(),
            self.records_found(),
            self.warning_count()
        )
    }
}
