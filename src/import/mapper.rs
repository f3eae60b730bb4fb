//! Record-to-row mapping.
//!
//! Converts a raw [`Record`] into a typed [`MappedRow`] for one target
//! table. Column treatment is decided by column-name pattern, in precedence
//! order: date-like, reference-like, numeric, boolean flag, plain text.
//! Reference columns (`*_id` and friends) are passed through as opaque
//! strings; resolving them against other tables is a separate concern this
//! stage never touches.
//!
//! Blank values are omitted from the row so column defaults apply on
//! insert. A missing primary key is repaired with a generated UUID, missing
//! `created_at`/`updated_at` with the run timestamp; both repairs are
//! informational, not errors.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{DatePolicy, EntityPlan};
use crate::import::coerce;
use crate::import::delimited::Record;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// A typed value bound for one column of the target table.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Bool(bool),
}

impl ColumnValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ColumnValue::Text(_) => "text",
            ColumnValue::Number(_) => "number",
            ColumnValue::Timestamp(_) => "timestamp",
            ColumnValue::Bool(_) => "boolean",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A typed row ready for persistence. Always carries a primary-key value
/// and both timestamp columns; never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    columns: Vec<(String, ColumnValue)>,
}

impl MappedRow {
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Iterate `(column, value)` pairs in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Errors that abort a run during mapping.
#[derive(Debug, Error)]
pub enum MapRowError {
    #[error("unparseable date `{raw}` in column {column}")]
    UnparseableDate { column: String, raw: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnClass {
    Date,
    Reference,
    Number,
    Flag,
    Text,
}

const NUMERIC_MARKERS: &[&str] = &[
    "amount", "rate", "hours", "minutes", "price", "cost", "total", "quantity", "qty", "budget",
];

const FLAG_NAMES: &[&str] = &[
    "active", "enabled", "billable", "billed", "archived", "paid", "signed",
];

fn classify(column: &str) -> ColumnClass {
    if is_date_like(column) {
        ColumnClass::Date
    } else if is_reference_like(column) {
        ColumnClass::Reference
    } else if is_numeric_like(column) {
        ColumnClass::Number
    } else if is_flag_like(column) {
        ColumnClass::Flag
    } else {
        ColumnClass::Text
    }
}

fn is_date_like(name: &str) -> bool {
    name == "date"
        || name.ends_with("_at")
        || name.ends_with("_on")
        || name.ends_with("_date")
        || name.starts_with("date_")
}

fn is_reference_like(name: &str) -> bool {
    name == "id" || name.ends_with("_id") || name.ends_with("_uuid") || name.ends_with("_ref")
}

fn is_numeric_like(name: &str) -> bool {
    name.split('_').any(|segment| NUMERIC_MARKERS.contains(&segment))
}

fn is_flag_like(name: &str) -> bool {
    name.starts_with("is_")
        || name.starts_with("has_")
        || name.ends_with("_flag")
        || FLAG_NAMES.contains(&name)
}

/// Maps records of one run. Holds the run timestamp so every generated
/// `created_at`/`updated_at` in a run agrees.
pub struct TableMapper {
    policy: DatePolicy,
    run_time: DateTime<Utc>,
}

impl TableMapper {
    pub fn new(policy: DatePolicy, run_time: DateTime<Utc>) -> Self {
        Self { policy, run_time }
    }

    /// Map one record to the target table's column shape.
    ///
    /// Dropped values and auto-repairs are appended to `warnings`; the only
    /// hard failure is an unparseable date under [`DatePolicy::Strict`].
    pub fn map_record(
        &self,
        record: &Record,
        plan: &EntityPlan,
        warnings: &mut Vec<String>,
    ) -> Result<MappedRow, MapRowError> {
        let mut columns: Vec<(String, ColumnValue)> = Vec::with_capacity(record.len() + 3);

        for (name, value) in record.fields() {
            let Some(raw) = value else { continue };
            if columns.iter().any(|(existing, _)| existing == name) {
                warnings.push(format!("duplicate column {name}, keeping first value"));
                continue;
            }

            let class = if name == plan.primary_key {
                ColumnClass::Reference
            } else {
                classify(name)
            };

            let mapped = match class {
                ColumnClass::Date => match coerce::coerce_date(raw) {
                    Some(ts) => Some(ColumnValue::Timestamp(ts)),
                    None => {
                        if self.policy == DatePolicy::Strict {
                            return Err(MapRowError::UnparseableDate {
                                column: name.to_string(),
                                raw: raw.to_string(),
                            });
                        }
                        let warning = format!("dropped unparseable date `{raw}` in column {name}");
                        log::warn!("{warning}");
                        warnings.push(warning);
                        None
                    }
                },
                ColumnClass::Reference => Some(ColumnValue::Text(raw.to_string())),
                ColumnClass::Number => match coerce::coerce_number(raw) {
                    Some(n) => Some(ColumnValue::Number(n)),
                    None => {
                        let warning = format!("dropped non-numeric `{raw}` in column {name}");
                        log::warn!("{warning}");
                        warnings.push(warning);
                        None
                    }
                },
                ColumnClass::Flag => match coerce::coerce_bool(raw) {
                    Some(b) => Some(ColumnValue::Bool(b)),
                    None => {
                        let warning = format!("dropped non-boolean `{raw}` in column {name}");
                        log::warn!("{warning}");
                        warnings.push(warning);
                        None
                    }
                },
                ColumnClass::Text => Some(ColumnValue::Text(raw.to_string())),
            };

            if let Some(value) = mapped {
                columns.push((name.to_string(), value));
            }
        }

        if !columns.iter().any(|(name, _)| *name == plan.primary_key) {
            let id = Uuid::new_v4().to_string();
            log::debug!(
                "generated {} = {} for a record missing its primary key",
                plan.primary_key,
                id
            );
            columns.insert(0, (plan.primary_key.clone(), ColumnValue::Text(id)));
        }
        if !columns.iter().any(|(name, _)| name == CREATED_AT) {
            columns.push((
                CREATED_AT.to_string(),
                ColumnValue::Timestamp(self.run_time),
            ));
        }
        if !columns.iter().any(|(name, _)| name == UPDATED_AT) {
            columns.push((
                UPDATED_AT.to_string(),
                ColumnValue::Timestamp(self.run_time),
            ));
        }

        Ok(MappedRow { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::delimited::{parse_table, DEFAULT_DELIMITER};

    fn plan() -> EntityPlan {
        EntityPlan::new("CLIENTS", "clients")
    }

    fn mapper() -> TableMapper {
        TableMapper::new(DatePolicy::NullOnError, Utc::now())
    }

    fn records(block: &str) -> Vec<Record> {
        parse_table(block, DEFAULT_DELIMITER).records
    }

    #[test]
    fn test_classifies_by_name_pattern() {
        assert_eq!(classify("start_date"), ColumnClass::Date);
        assert_eq!(classify("paid_at"), ColumnClass::Date);
        assert_eq!(classify("issued_on"), ColumnClass::Date);
        assert_eq!(classify("client_id"), ColumnClass::Reference);
        assert_eq!(classify("hourly_rate"), ColumnClass::Number);
        assert_eq!(classify("budget_hours"), ColumnClass::Number);
        assert_eq!(classify("tax_amount"), ColumnClass::Number);
        assert_eq!(classify("billable"), ColumnClass::Flag);
        assert_eq!(classify("is_internal"), ColumnClass::Flag);
        assert_eq!(classify("description"), ColumnClass::Text);
        assert_eq!(classify("invoice_number"), ColumnClass::Text);
    }

    #[test]
    fn test_date_rule_wins_over_flag_rule() {
        // `paid_at` must become a timestamp even though `paid` is a flag name.
        assert_eq!(classify("paid_at"), ColumnClass::Date);
    }

    #[test]
    fn test_maps_typed_values() {
        let recs = records("name,hourly_rate,billable,start_date\nAcme,$120.00,yes,2023-05-14\n");
        let mut warnings = Vec::new();
        let row = mapper().map_record(&recs[0], &plan(), &mut warnings).unwrap();

        assert_eq!(row.get("name"), Some(&ColumnValue::Text("Acme".into())));
        assert_eq!(row.get("hourly_rate"), Some(&ColumnValue::Number(120.0)));
        assert_eq!(row.get("billable"), Some(&ColumnValue::Bool(true)));
        assert!(matches!(
            row.get("start_date"),
            Some(ColumnValue::Timestamp(_))
        ));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_source_primary_key_is_kept_verbatim() {
        let recs = records("id,name\nlegacy-007,Acme\n");
        let mut warnings = Vec::new();
        let mapper = mapper();
        let first = mapper.map_record(&recs[0], &plan(), &mut warnings).unwrap();
        let second = mapper.map_record(&recs[0], &plan(), &mut warnings).unwrap();

        assert_eq!(first.get("id").unwrap().as_text(), Some("legacy-007"));
        assert_eq!(first.get("id"), second.get("id"));
    }

    #[test]
    fn test_missing_primary_key_is_generated_and_unique() {
        let recs = records("name\nAcme\nGlobex\n");
        let mut warnings = Vec::new();
        let mapper = mapper();
        let a = mapper.map_record(&recs[0], &plan(), &mut warnings).unwrap();
        let b = mapper.map_record(&recs[1], &plan(), &mut warnings).unwrap();

        let id_a = a.get("id").unwrap().as_text().unwrap();
        let id_b = b.get("id").unwrap().as_text().unwrap();
        assert!(!id_a.is_empty());
        assert_ne!(id_a, id_b);
        assert!(Uuid::parse_str(id_a).is_ok());
    }

    #[test]
    fn test_missing_timestamps_use_run_time() {
        let run_time = Utc::now();
        let mapper = TableMapper::new(DatePolicy::NullOnError, run_time);
        let recs = records("name\nAcme\n");
        let mut warnings = Vec::new();
        let row = mapper.map_record(&recs[0], &plan(), &mut warnings).unwrap();

        assert_eq!(
            row.get(CREATED_AT),
            Some(&ColumnValue::Timestamp(run_time))
        );
        assert_eq!(
            row.get(UPDATED_AT),
            Some(&ColumnValue::Timestamp(run_time))
        );
    }

    #[test]
    fn test_source_timestamps_are_not_overwritten() {
        let recs = records("name,created_at\nAcme,2020-01-01\n");
        let mut warnings = Vec::new();
        let row = mapper().map_record(&recs[0], &plan(), &mut warnings).unwrap();

        let Some(ColumnValue::Timestamp(created)) = row.get(CREATED_AT) else {
            panic!("created_at should be a timestamp");
        };
        assert_eq!(created.timestamp(), 1577836800);
        // updated_at was absent and still gets repaired.
        assert!(row.get(UPDATED_AT).is_some());
    }

    #[test]
    fn test_blank_values_are_omitted() {
        let recs = records("name,notes,email\nAcme,,a@x.com\n");
        let mut warnings = Vec::new();
        let row = mapper().map_record(&recs[0], &plan(), &mut warnings).unwrap();
        assert_eq!(row.get("notes"), None);
    }

    #[test]
    fn test_lenient_policy_drops_bad_date_with_warning() {
        let recs = records("name,start_date\nAcme,someday\n");
        let mut warnings = Vec::new();
        let row = mapper().map_record(&recs[0], &plan(), &mut warnings).unwrap();

        assert_eq!(row.get("start_date"), None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("someday"));
    }

    #[test]
    fn test_strict_policy_fails_on_bad_date() {
        let mapper = TableMapper::new(DatePolicy::Strict, Utc::now());
        let recs = records("name,start_date\nAcme,someday\n");
        let mut warnings = Vec::new();
        let err = mapper
            .map_record(&recs[0], &plan(), &mut warnings)
            .unwrap_err();
        assert!(matches!(err, MapRowError::UnparseableDate { .. }));
    }

    #[test]
    fn test_reference_columns_pass_through_unchanged() {
        let recs = records("name,client_id\nwebsite,legacy/42\n");
        let mut warnings = Vec::new();
        let row = mapper()
            .map_record(&recs[0], &EntityPlan::new("PROJECTS", "projects"), &mut warnings)
            .unwrap();
        assert_eq!(row.get("client_id").unwrap().as_text(), Some("legacy/42"));
    }

    #[test]
    fn test_custom_primary_key_column() {
        let mut plan = EntityPlan::new("CLIENTS", "clients");
        plan.primary_key = "client_key".to_string();
        let recs = records("name\nAcme\n");
        let mut warnings = Vec::new();
        let row = mapper().map_record(&recs[0], &plan, &mut warnings).unwrap();
        assert!(row.get("client_key").is_some());
        assert_eq!(row.get("id"), None);
    }
}
