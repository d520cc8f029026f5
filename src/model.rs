use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const RECORD_ID_FIELD: &str = "study_id";
pub const EVENT_FIELD: &str = "redcap_event_name";

/// One row of a REDCap flat export. Values stay as exported; an empty string
/// means the field has no value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: serde_json::Map<String, serde_json::Value>) -> Self {
        let fields = value
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect();
        Self { fields }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn study_id(&self) -> &str {
        self.text(RECORD_ID_FIELD).unwrap_or_default()
    }

    pub fn event(&self) -> &str {
        self.text(EVENT_FIELD).unwrap_or_default()
    }

    /// Non-blank value of a field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn is_blank(&self, name: &str) -> bool {
        self.text(name).is_none()
    }

    /// Numeric value of a field; blank and non-numeric values are `None`.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.text(name)
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| !value.is_nan())
    }

    pub fn number_equals(&self, name: &str, expected: f64) -> bool {
        self.number(name) == Some(expected)
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemographicsRow {
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
}

/// Per-subject attributes some scoring formulas need.
#[derive(Debug, Clone, Default)]
pub struct Demographics {
    by_subject: BTreeMap<String, DemographicsRow>,
}

impl Demographics {
    pub const FIELDS: [&'static str; 2] = ["dob", "sex"];

    /// Builds demographics from exported records, taking the first non-blank
    /// value per subject since demographics live on a single event.
    pub fn from_records(records: &[Record]) -> Self {
        let mut by_subject: BTreeMap<String, DemographicsRow> = BTreeMap::new();

        for record in records {
            let subject = record.study_id();
            if subject.is_empty() {
                continue;
            }
            let row = by_subject.entry(subject.to_string()).or_default();
            if row.date_of_birth.is_none() {
                row.date_of_birth = record
                    .text("dob")
                    .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok());
            }
            if row.sex.is_none() {
                row.sex = record.text("sex").map(ToOwned::to_owned);
            }
        }

        Self { by_subject }
    }

    #[allow(dead_code)]
    pub fn get(&self, subject: &str) -> Option<&DemographicsRow> {
        self.by_subject.get(subject)
    }

    pub fn len(&self) -> usize {
        self.by_subject.len()
    }
}
