//! Neuroradiology findings QC over exported MR session rows.

use std::fs;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cli::NeuroradArgs;
use crate::config::Config;
use crate::util::write_csv_file;
use crate::xnat::{SessionFields, XnatClient};

/// Site ids of study subjects; phantom scans carry other labels.
const SITE_ID_PATTERN: &str = r"[A-EX]-[0-9]{5}-[MFT]-[0-9]";
const FINDINGS_DATE_FIELD: &str = "findingsdate";

const COLUMNS: [&str; 8] = [
    "check",
    "project",
    "subject_id",
    "experiment_id",
    "site_id",
    "findings",
    "findingsdate",
    "datetodvd",
];

/// One MR session as exported from XNAT. Blank values count as empty.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SessionRow {
    pub project: String,
    pub subject_id: String,
    pub experiment_id: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub findingsdate: Option<String>,
    #[serde(default)]
    pub datetodvd: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

impl SessionRow {
    pub fn findings(&self) -> Option<&str> {
        present(&self.findings)
    }

    pub fn findings_date(&self) -> Option<&str> {
        present(&self.findingsdate)
    }

    pub fn dvd_date(&self) -> Option<&str> {
        present(&self.datetodvd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingsCheck {
    /// Findings entered without a findings date.
    FindingsDateEmpty,
    /// A findings date without findings.
    FindingsEmpty,
    FindingsAndDateEmpty,
    /// DVD made before the given date.
    DvdBefore(NaiveDate),
}

impl FindingsCheck {
    pub fn name(self) -> &'static str {
        match self {
            Self::FindingsDateEmpty => "findings_date_empty",
            Self::FindingsEmpty => "findings_empty",
            Self::FindingsAndDateEmpty => "findings_and_date_empty",
            Self::DvdBefore(_) => "datetodvd_before_date",
        }
    }

    pub fn matches(self, row: &SessionRow) -> bool {
        match self {
            Self::FindingsDateEmpty => row.findings().is_some() && row.findings_date().is_none(),
            Self::FindingsEmpty => row.findings_date().is_some() && row.findings().is_none(),
            Self::FindingsAndDateEmpty => {
                row.findings().is_none() && row.findings_date().is_none()
            }
            Self::DvdBefore(cutoff) => match row.dvd_date().map(parse_date) {
                Some(Some(date)) => date < cutoff,
                Some(None) => {
                    warn!(
                        experiment = %row.experiment_id,
                        datetodvd = row.dvd_date().unwrap_or_default(),
                        "unreadable DVD date"
                    );
                    false
                }
                None => false,
            },
        }
    }
}

/// Reads the date part of `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Drops phantom and test sessions.
pub fn study_sessions(rows: Vec<SessionRow>) -> Result<Vec<SessionRow>> {
    let pattern = Regex::new(SITE_ID_PATTERN).context("failed to compile site id regex")?;
    let total = rows.len();
    let sessions: Vec<SessionRow> = rows
        .into_iter()
        .filter(|row| pattern.is_match(&row.site_id))
        .collect();
    debug!(total, kept = sessions.len(), "filtered study sessions");
    Ok(sessions)
}

/// Every (check, session) pair that fails, grouped by check in the order
/// given.
pub fn check_sessions<'a>(
    sessions: &'a [SessionRow],
    checks: &[FindingsCheck],
) -> Vec<(FindingsCheck, &'a SessionRow)> {
    checks
        .iter()
        .flat_map(|check| {
            sessions
                .iter()
                .filter(move |row| check.matches(row))
                .map(move |row| (*check, row))
        })
        .collect()
}

/// Sets the findings date to the DVD date wherever findings are entered
/// without one. Sessions without a DVD date are skipped.
pub fn update_findings_dates(fields: &dyn SessionFields, sessions: &[SessionRow]) -> Result<usize> {
    let mut updated = 0;
    for row in sessions
        .iter()
        .filter(|row| FindingsCheck::FindingsDateEmpty.matches(row))
    {
        let Some(dvd_date) = row.dvd_date() else {
            warn!(experiment = %row.experiment_id, "no DVD date to use as findings date");
            continue;
        };
        fields
            .set_session_field(
                &row.project,
                &row.subject_id,
                &row.experiment_id,
                FINDINGS_DATE_FIELD,
                dvd_date,
            )
            .with_context(|| format!("failed to set findings date of {}", row.experiment_id))?;
        debug!(experiment = %row.experiment_id, findingsdate = dvd_date, "set findings date");
        updated += 1;
    }
    Ok(updated)
}

fn csv_row(check: FindingsCheck, row: &SessionRow) -> Vec<&str> {
    vec![
        check.name(),
        row.project.as_str(),
        row.subject_id.as_str(),
        row.experiment_id.as_str(),
        row.site_id.as_str(),
        row.findings().unwrap_or_default(),
        row.findings_date().unwrap_or_default(),
        row.dvd_date().unwrap_or_default(),
    ]
}

pub fn run(args: NeuroradArgs, config: &Config) -> Result<()> {
    let raw = fs::read(&args.experiments)
        .with_context(|| format!("failed to read {}", args.experiments.display()))?;
    let rows: Vec<SessionRow> = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", args.experiments.display()))?;
    let sessions = study_sessions(rows)?;

    let mut checks = vec![
        FindingsCheck::FindingsDateEmpty,
        FindingsCheck::FindingsEmpty,
        FindingsCheck::FindingsAndDateEmpty,
    ];
    checks.extend(args.before_date.map(FindingsCheck::DvdBefore));

    let flagged = check_sessions(&sessions, &checks);
    let rows: Vec<Vec<&str>> = flagged
        .iter()
        .map(|(check, row)| csv_row(*check, row))
        .collect();
    write_csv_file(&args.outfile, &COLUMNS, &rows)?;
    info!(
        sessions = sessions.len(),
        flagged = flagged.len(),
        outfile = %args.outfile.display(),
        "wrote neuroradiology findings report"
    );

    if args.update_findings_date {
        let xnat = XnatClient::from_args(&args.xnat, config)?;
        let updated = update_findings_dates(&xnat, &sessions)?;
        info!(updated, "updated findings dates on XNAT");
    }
    Ok(())
}
