//! Quality-control reports over REDCap data-entry exports and XNAT session
//! exports.

use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::cli::{CaseKind, ReportArgs, ReportKind};
use crate::config::Config;
use crate::model::{EVENT_FIELD, RECORD_ID_FIELD, Record};
use crate::redcap::{ExportRequest, RedcapClient};
use crate::util::{write_csv_file, write_json_lines};

mod neurorad;
#[cfg(test)]
mod tests;

const FORM_MISSING: &str = "ERROR: Form is missing";
const NP_MISSING: &str = "ERROR: NP is missing.";
const WAIS_UNVERIFIED: &str = "ERROR: WAIS score is not verified";

const VISIT_FIELDS: [&str; 5] = [
    RECORD_ID_FIELD,
    EVENT_FIELD,
    "exclude",
    "visit_ignore",
    "visit_date",
];

/// (missing flag, value that must be present) per questionnaire.
const FORM_PAIRS: [(&str, &str); 5] = [
    ("youthreport1_missing", "youthreport1_date"),
    ("youthreport1b_missing", "youthreport1b_date"),
    ("youthreport2_missing", "youthreport2_date"),
    ("parentreport_missing", "parentreport_date"),
    ("ssage_youth_missing", "ssage_youth_date"),
];

const NP_PAIRS: [(&str, &str); 10] = [
    ("bio_np_missing", "bio_np_date"),
    ("dd1000_missing", "dd1000_date"),
    ("dd100_missing", "dd100_date"),
    ("np_wrat4_missing", "np_wrat4_wr_raw"),
    ("np_reyo_missing", "np_reyo_copy_time"),
    ("np_atax_missing", "np_atax_sht_trial1"),
    ("np_wais4_missing", "np_wais4_corr15s"),
    ("pasat_missing", "pasat_date"),
    ("cnp_missing", "cnp_test_sessions_dotest"),
    ("stroop_missing", "stroop_date"),
];

const GPEG_MISSING: &str = "np_gpeg_missing";

/// (hand exclusion checkbox, pegboard time) per hand.
const GPEG_PAIRS: [(&str, &str); 2] = [
    ("np_gpeg_exclusion___dh", "np_gpeg_dh_time"),
    ("np_gpeg_exclusion___ndh", "np_gpeg_ndh_time"),
];

const WAIS_COMPUTED: &str = "np_wais4_rawscore_computed";
const WAIS_DIFF: &str = "np_wais4_rawscore_diff(correct)";

const CASE_EVENTS: [&str; 2] = ["baseline_visit_arm_1", "1y_visit_arm_1"];

/// One QC finding. Fields are declared in key order so JSON lines come out
/// with sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub error: &'static str,
    pub event_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub np_missing: Option<&'static str>,
    pub subject_site_id: String,
    pub visit_date: Option<String>,
}

impl Finding {
    fn new(record: &Record, error: &'static str, np_missing: Option<&'static str>) -> Self {
        Self {
            error,
            event_name: record.event().to_string(),
            np_missing,
            subject_site_id: record.study_id().to_string(),
            visit_date: record.text("visit_date").map(ToOwned::to_owned),
        }
    }

    fn csv_row(&self) -> Vec<&str> {
        vec![
            self.subject_site_id.as_str(),
            self.visit_date.as_deref().unwrap_or_default(),
            self.np_missing.unwrap_or_default(),
            self.event_name.as_str(),
            self.error,
        ]
    }
}

pub fn run(args: ReportArgs, config: &Config) -> Result<()> {
    let redcap = || RedcapClient::from_args(&args.redcap, config);

    match args.kind {
        ReportKind::MissingForms { event, outfile } => {
            let records = redcap()?.export_records(
                &ExportRequest::fields(&missing_form_fields()).with_events(&[&event]),
            )?;
            let findings = missing_forms(&records);
            let rows: Vec<Vec<&str>> = findings.iter().map(Finding::csv_row).collect();
            write_csv_file(
                &outfile,
                &[
                    "subject_site_id",
                    "visit_date",
                    "np_missing",
                    "event_name",
                    "error",
                ],
                &rows,
            )?;
            info!(
                event = %event,
                missing = findings.len(),
                outfile = %outfile.display(),
                "wrote missing form report"
            );
        }
        ReportKind::MissingNp { event } => {
            let records = redcap()?.export_records(
                &ExportRequest::fields(&missing_np_fields()).with_events(&[&event]),
            )?;
            let findings = missing_np(&records);
            write_json_lines(&mut io::stdout().lock(), &findings)?;
            info!(event = %event, missing = findings.len(), "checked neuropsych entry");
        }
        ReportKind::WaisVerification { event } => {
            let records = redcap()?.export_records(
                &ExportRequest::fields(&wais_fields()).with_events(&[&event]),
            )?;
            let findings = unverified_wais_scores(&records);
            write_json_lines(&mut io::stdout().lock(), &findings)?;
            info!(event = %event, unverified = findings.len(), "checked WAIS raw scores");
        }
        ReportKind::Cases { kind, outfile } => {
            let outfile = outfile.unwrap_or_else(|| kind.default_outfile().into());
            let request = ExportRequest::fields(case_fields(kind))
                .with_forms(case_forms(kind))
                .with_events(&CASE_EVENTS);
            let records = redcap()?.export_records(&request)?;
            let rows = case_rows(kind, &records);
            write_csv_file(&outfile, case_columns(kind), &rows)?;
            info!(
                kind = ?kind,
                cases = rows.len(),
                outfile = %outfile.display(),
                "wrote case list"
            );
        }
        ReportKind::Neurorad(neurorad_args) => neurorad::run(neurorad_args, config)?,
    }
    Ok(())
}

fn missing_form_fields() -> Vec<&'static str> {
    let mut fields = VISIT_FIELDS.to_vec();
    fields.push("visit_notes");
    for (missing, value) in FORM_PAIRS {
        fields.extend([missing, value]);
    }
    fields
}

fn missing_np_fields() -> Vec<&'static str> {
    let mut fields = VISIT_FIELDS.to_vec();
    fields.extend(["visit_notes", "np_notes"]);
    for (missing, value) in NP_PAIRS {
        fields.extend([missing, value]);
    }
    fields.extend([GPEG_MISSING, "np_gpeg_exclusion"]);
    fields.extend(GPEG_PAIRS.map(|(_, value)| value));
    fields.extend(["mri_stroop_missing", "mri_stroop_date"]);
    fields
}

fn wais_fields() -> Vec<&'static str> {
    let mut fields = VISIT_FIELDS.to_vec();
    fields.extend([
        "np_wais4_missing",
        "np_wais4_rawscore",
        WAIS_COMPUTED,
        WAIS_DIFF,
    ]);
    fields
}

/// Visit counts for QC when it is not excluded and explicitly not ignored.
fn visit_is_active(record: &Record) -> bool {
    record.is_blank("exclude") && record.number_equals("visit_ignore___yes", 0.0)
}

/// Missing flag explicitly unset or never filled in.
fn not_marked_missing(record: &Record, field: &str) -> bool {
    record.is_blank(field) || record.number_equals(field, 0.0)
}

/// Questionnaires whose missing flag is explicitly 0 but have no date.
pub fn missing_forms(records: &[Record]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for record in records.iter().filter(|record| visit_is_active(record)) {
        for (missing, value) in FORM_PAIRS {
            if record.number_equals(missing, 0.0) && record.is_blank(value) {
                findings.push(Finding::new(record, FORM_MISSING, Some(missing)));
            }
        }
    }
    findings
}

/// Neuropsych assessments that are not marked missing but have no value.
/// Pegboard hands excluded by the examiner are not expected.
pub fn missing_np(records: &[Record]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for record in records.iter().filter(|record| visit_is_active(record)) {
        for (missing, value) in NP_PAIRS {
            if not_marked_missing(record, missing) && record.is_blank(value) {
                findings.push(Finding::new(record, NP_MISSING, Some(missing)));
            }
        }
        for (exclusion, value) in GPEG_PAIRS {
            if record.number_equals(exclusion, 0.0)
                && not_marked_missing(record, GPEG_MISSING)
                && record.is_blank(value)
            {
                findings.push(Finding::new(record, NP_MISSING, Some(GPEG_MISSING)));
            }
        }
    }
    findings
}

/// Rows where the computed WAIS raw score equals a non-zero correction, i.e.
/// the entered score was never reconciled.
pub fn unverified_wais_scores(records: &[Record]) -> Vec<Finding> {
    records
        .iter()
        .filter(|record| {
            record.is_blank("exclude")
                && !record.number_equals("visit_ignore___yes", 1.0)
                && !record.number_equals("np_wais4_missing", 1.0)
        })
        .filter(|record| {
            match (record.number(WAIS_COMPUTED), record.number(WAIS_DIFF)) {
                (Some(computed), Some(diff)) => computed == diff && diff != 0.0,
                _ => false,
            }
        })
        .map(|record| Finding::new(record, WAIS_UNVERIFIED, None))
        .collect()
}

fn case_fields(kind: CaseKind) -> &'static [&'static str] {
    match kind {
        CaseKind::Np => &[RECORD_ID_FIELD, "exclude", "visit_ignore___yes"],
        CaseKind::Mri => &[RECORD_ID_FIELD, "exclude", "mri_missing"],
    }
}

fn case_forms(kind: CaseKind) -> &'static [&'static str] {
    match kind {
        CaseKind::Np => &["mr_session_report", "visit_date"],
        CaseKind::Mri => &["mr_session_report"],
    }
}

fn case_columns(kind: CaseKind) -> &'static [&'static str] {
    match kind {
        CaseKind::Np => &[
            RECORD_ID_FIELD,
            EVENT_FIELD,
            "exclude",
            "visit_ignore___yes",
            "mri_xnat_sid",
            "mri_xnat_eids",
        ],
        CaseKind::Mri => &[RECORD_ID_FIELD, EVENT_FIELD, "exclude", "mri_missing"],
    }
}

/// Included visits as CSV rows in `case_columns` order.
pub fn case_rows(kind: CaseKind, records: &[Record]) -> Vec<Vec<String>> {
    let collected_flag = match kind {
        CaseKind::Np => "visit_ignore___yes",
        CaseKind::Mri => "mri_missing",
    };

    records
        .iter()
        .filter(|record| {
            !record.number_equals("exclude", 1.0) && !record.number_equals(collected_flag, 1.0)
        })
        .map(|record| {
            case_columns(kind)
                .iter()
                .map(|column| record.text(column).unwrap_or_default().to_string())
                .collect()
        })
        .collect()
}
