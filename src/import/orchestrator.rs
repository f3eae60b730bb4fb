//! Run orchestration.
//!
//! Sequences the pipeline across entity types: extract sections once, then
//! for each plan entry in declared order parse, map, and load. Declared
//! order is the only parent-before-child mechanism; referential integrity
//! between entity types is not validated here. One pass, no retry, no
//! checkpointing — re-running the whole import is the recovery path, and it
//! is safe because loads are upserts.

use chrono::Utc;
use sqlx::PgPool;

use crate::config::{EntityPlan, ImportConfig};
use crate::error::ImportError;
use crate::import::delimited::{self, ParsedTable};
use crate::import::loader::BatchLoader;
use crate::import::mapper::{MappedRow, TableMapper};
use crate::import::report::{EntityReport, RunReport};
use crate::import::sections::{self, SectionMap};

pub struct ImportOrchestrator<'a> {
    config: &'a ImportConfig,
    pool: &'a PgPool,
}

impl<'a> ImportOrchestrator<'a> {
    pub fn new(config: &'a ImportConfig, pool: &'a PgPool) -> Self {
        Self { config, pool }
    }

    /// Execute a full import run over `document`.
    ///
    /// Fatal only when the database is unreachable or mapping fails under
    /// the strict date policy; per-entity and per-batch problems are
    /// reported in the returned [`RunReport`].
    pub async fn run(&self, document: &str) -> Result<RunReport, ImportError> {
        // Fail before any entity is touched when the database is down.
        sqlx::query("SELECT 1").execute(self.pool).await?;

        let run_time = Utc::now();
        log::info!(
            "starting import run: {} entity types, batch size {}",
            self.config.plan.len(),
            self.config.batch_size
        );

        let mapper = TableMapper::new(self.config.date_policy, run_time);
        let loader = BatchLoader::new(self.pool, self.config.batch_size);
        let sections = sectionize(self.config, document);

        let mut report = RunReport::default();
        for plan in &self.config.plan {
            let (mut entity, rows) = process_entity(self.config, &mapper, plan, &sections)?;
            if !rows.is_empty() {
                entity.batches = loader.load(&plan.table, &plan.primary_key, &rows).await;
                entity.records_written = entity.batches.iter().map(|b| b.written).sum();
            }
            log::info!(
                "{}: {} found, {} mapped, {} written",
                plan.entity,
                entity.records_found,
                entity.records_mapped,
                entity.records_written
            );
            report.entities.push(entity);
        }

        log::info!(
            "import run complete: {} rows written, {} failed batches, {} warnings",
            report.records_written(),
            report.failed_batches(),
            report.warning_count()
        );
        Ok(report)
    }
}

/// Parse and map a document without a database: same sectioning, parsing,
/// and mapping as a real run, nothing written.
pub fn inspect(config: &ImportConfig, document: &str) -> Result<RunReport, ImportError> {
    let mapper = TableMapper::new(config.date_policy, Utc::now());
    let sections = sectionize(config, document);

    let mut report = RunReport::default();
    for plan in &config.plan {
        let (entity, _rows) = process_entity(config, &mapper, plan, &sections)?;
        report.entities.push(entity);
    }
    Ok(report)
}

/// Extract sections; a marker-less document is a single-table export and
/// feeds the sole plan entry when there is exactly one.
fn sectionize(config: &ImportConfig, document: &str) -> SectionMap {
    let mut sections = sections::split_sections(document);
    if sections.is_empty() && config.plan.len() == 1 {
        let tag = &config.plan[0].entity;
        log::info!("no section markers found, treating document as a single {tag} table");
        sections.insert_block(tag, document);
    }
    sections
}

fn process_entity(
    config: &ImportConfig,
    mapper: &TableMapper,
    plan: &EntityPlan,
    sections: &SectionMap,
) -> Result<(EntityReport, Vec<MappedRow>), ImportError> {
    let mut entity = EntityReport::new(&plan.entity, &plan.table);

    let block = match sections.get(&plan.entity) {
        None => {
            log::warn!("section {} missing from document, skipping", plan.entity);
            entity.warnings.push("section missing".to_string());
            return Ok((entity, Vec::new()));
        }
        Some(block) if block.trim().is_empty() => {
            log::warn!("section {} is empty, skipping", plan.entity);
            entity.warnings.push("section empty".to_string());
            return Ok((entity, Vec::new()));
        }
        Some(block) => block,
    };

    let ParsedTable { records, warnings } = delimited::parse_table(block, config.delimiter);
    entity.records_found = records.len();
    entity.warnings.extend(warnings);

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let row = mapper
            .map_record(record, plan, &mut entity.warnings)
            .map_err(|source| ImportError::Mapping {
                entity: plan.entity.clone(),
                source,
            })?;
        rows.push(row);
    }
    entity.records_mapped = rows.len();

    Ok((entity, rows))
}
