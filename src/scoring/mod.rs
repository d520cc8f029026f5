//! Survey instrument scoring.
//!
//! Every instrument declares the REDCap fields it needs per form, filters the
//! exported rows down to completed, non-missing surveys and turns each of
//! them into one score row for the `clinical` form. Rows that cannot be
//! scored come back as [`ScoreFailure`]s next to the scores so a failed
//! batch is never mistaken for an empty one.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::Serialize;

use crate::model::{Demographics, EVENT_FIELD, RECORD_ID_FIELD, Record};

mod cesd;
mod delegate;
mod field_map;
mod filter;
mod scsm;
#[cfg(test)]
mod tests;
mod tipi;

pub use cesd::Cesd;
pub use delegate::{RscriptDelegate, ScoringDelegate};
pub use field_map::FieldMap;
pub use filter::eligible_records;
pub use scsm::Scsm;
pub use tipi::Tipi;

/// REDCap form the scores are imported into.
pub const OUTPUT_FORM: &str = "clinical";

/// Form name to the exact list of fields required from it.
pub type InputFields = BTreeMap<String, Vec<String>>;

pub trait Instrument {
    /// Short name used on the command line and in logs.
    fn name(&self) -> &str;

    /// Fields to export, per source form, control columns first.
    fn input_fields(&self) -> &InputFields;

    fn output_form(&self) -> &str {
        OUTPUT_FORM
    }

    /// Output columns in import order, completion flag first.
    fn output_fields(&self) -> Vec<String>;

    fn compute_scores(
        &self,
        records: &[Record],
        demographics: &Demographics,
        delegate: &dyn ScoringDelegate,
    ) -> ScoreOutcome;

    fn requested_fields(&self) -> Vec<String> {
        self.input_fields()
            .values()
            .flat_map(|fields| fields.iter().cloned())
            .collect()
    }
}

/// Every registered instrument.
pub fn all_instruments() -> Result<Vec<Box<dyn Instrument>>> {
    Ok(vec![
        Box::new(Cesd::new()?),
        Box::new(Scsm::new()),
        Box::new(Tipi::new()?),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    pub study_id: String,
    pub redcap_event_name: String,
    pub values: Vec<String>,
}

/// Score rows aligned with `columns`, indexed by (study_id, event).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    pub columns: Vec<String>,
    pub rows: Vec<ScoreRow>,
}

impl ScoreTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, record: &Record, values: Vec<String>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(ScoreRow {
            study_id: record.study_id().to_string(),
            redcap_event_name: record.event().to_string(),
            values,
        });
    }

    #[cfg(test)]
    pub fn get(&self, study_id: &str, event: &str, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.rows
            .iter()
            .find(|row| row.study_id == study_id && row.redcap_event_name == event)
            .map(|row| row.values[index].as_str())
    }

    /// Flat records ready for a REDCap import.
    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = Record::new()
                    .with(RECORD_ID_FIELD, row.study_id.clone())
                    .with(EVENT_FIELD, row.redcap_event_name.clone());
                for (column, value) in self.columns.iter().zip(&row.values) {
                    record.set(column, value.clone());
                }
                record
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreFailure {
    pub study_id: String,
    pub redcap_event_name: String,
    pub reason: String,
}

impl ScoreFailure {
    pub fn new(record: &Record, reason: impl Into<String>) -> Self {
        Self {
            study_id: record.study_id().to_string(),
            redcap_event_name: record.event().to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ScoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {}",
            self.study_id, self.redcap_event_name, self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// No row passed the eligibility filter.
    NoData,
    Scored {
        table: ScoreTable,
        failures: Vec<ScoreFailure>,
    },
}

impl ScoreOutcome {
    pub fn failures(&self) -> &[ScoreFailure] {
        match self {
            Self::NoData => &[],
            Self::Scored { failures, .. } => failures,
        }
    }
}

/// Integer completion flag copied from the source form.
fn completion_flag(record: &Record, complete_field: &str) -> String {
    record
        .number(complete_field)
        .map(|value| (value.trunc() as i64).to_string())
        .unwrap_or_default()
}
