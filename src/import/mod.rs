//! Legacy export import pipeline.
//!
//! Replaces the pile of per-table migration scripts with one parameterized
//! pipeline. A run takes a UTF-8 export document — either a single
//! delimited table or several concatenated tables introduced by
//! `=== NAME ===` markers — and loads it into PostgreSQL, one table per
//! entity type, via batched upserts.
//!
//! # Stages
//!
//! - **`sections`**: split the document into named blocks on marker lines.
//!   Preamble before the first marker is discarded; duplicate sections are
//!   concatenated in encounter order.
//!
//! - **`delimited`**: parse one block into [`delimited::Record`]s. Handles
//!   quoted fields, embedded delimiters, and embedded object/array
//!   literals; malformed lines are skipped with a warning, never fatal.
//!
//! - **`coerce`**: pure text-to-typed conversions (dates, numbers, flags).
//!
//! - **`mapper`**: shape a Record into a [`mapper::MappedRow`] by
//!   column-name pattern, generating the primary key and timestamps when
//!   the source lacks them.
//!
//! - **`loader`**: write MappedRows in fixed-size batches with
//!   `INSERT … ON CONFLICT DO UPDATE`. Batches are independent and
//!   best-effort; each outcome is a [`report::BatchResult`].
//!
//! - **`orchestrator`**: run the stages across all entity types in the
//!   declared plan order and aggregate the [`report::RunReport`].
//!
//! Execution is strictly sequential: one entity type at a time, one batch
//! in flight at a time. Re-running a whole import is the only retry
//! mechanism, and it is safe because every write is an upsert keyed on the
//! primary key.

pub mod coerce;
pub mod delimited;
pub mod loader;
pub mod mapper;
pub mod orchestrator;
pub mod report;
pub mod sections;

pub use orchestrator::{inspect, ImportOrchestrator};
pub use report::{BatchResult, EntityReport, RunReport};
