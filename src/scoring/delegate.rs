use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::debug;

use super::{FieldMap, InputFields, ScoreFailure, ScoreOutcome, ScoreTable, completion_flag, eligible_records};
use crate::config::ScoringConfig;
use crate::model::Record;

/// External scoring routine invoked once per eligible row.
pub trait ScoringDelegate {
    /// Scores one row. `inputs` maps the routine's own item names to raw
    /// values; the result maps score names to values.
    fn score(
        &self,
        script: &str,
        scores_key: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>>;
}

/// Runs `<rscript> <script_dir>/<script> <input.json> <output.json> <key>`.
pub struct RscriptDelegate {
    program: PathBuf,
    script_dir: PathBuf,
}

impl RscriptDelegate {
    pub fn new(program: impl Into<PathBuf>, script_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script_dir: script_dir.into(),
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(&config.rscript, &config.script_dir)
    }
}

impl ScoringDelegate for RscriptDelegate {
    fn score(
        &self,
        script: &str,
        scores_key: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let workdir = tempfile::Builder::new()
            .prefix("ncanda_score_")
            .tempdir()
            .context("failed to create scoring scratch directory")?;
        let input_path = workdir.path().join("input.json");
        let output_path = workdir.path().join("output.json");
        let script_path = self.script_dir.join(script);

        let payload = serde_json::to_vec(inputs).context("failed to serialize scoring input")?;
        fs::write(&input_path, payload)
            .with_context(|| format!("failed to write {}", input_path.display()))?;

        let output = Command::new(&self.program)
            .arg(&script_path)
            .arg(&input_path)
            .arg(&output_path)
            .arg(scores_key)
            .output()
            .with_context(|| {
                format!(
                    "failed to execute {} {}",
                    self.program.display(),
                    script_path.display()
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} returned {}: {}",
                script_path.display(),
                output.status,
                stderr.trim()
            );
        }

        read_scores(&output_path)
    }
}

fn read_scores(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        bail!("scoring script did not write {}", path.display());
    }

    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let values: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(values
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            (name, text)
        })
        .collect())
}

/// An instrument scored by an external routine.
pub(super) struct DelegatedScoring {
    pub complete_field: &'static str,
    pub missing_field: &'static str,
    pub complete_output: &'static str,
    pub script: &'static str,
    pub scores_key: &'static str,
    /// REDCap field name to survey label.
    pub inputs: FieldMap,
    /// REDCap score field to delegate score name.
    pub results: FieldMap,
}

impl DelegatedScoring {
    /// Fields exported from `form`: both flags followed by every mapped item.
    pub fn input_fields(&self, form: &str) -> InputFields {
        let mut fields = vec![
            self.complete_field.to_string(),
            self.missing_field.to_string(),
        ];
        fields.extend(self.inputs.external_names().map(ToOwned::to_owned));
        InputFields::from([(form.to_string(), fields)])
    }

    pub fn output_fields(&self) -> Vec<String> {
        std::iter::once(self.complete_output)
            .chain(self.results.external_names())
            .map(ToOwned::to_owned)
            .collect()
    }

    pub fn run(&self, records: &[Record], delegate: &dyn ScoringDelegate) -> ScoreOutcome {
        let eligible = eligible_records(records, self.complete_field, self.missing_field);
        if eligible.is_empty() {
            return ScoreOutcome::NoData;
        }

        let mut table = ScoreTable::new(self.output_fields());
        let mut failures = Vec::new();

        for record in eligible {
            let inputs: BTreeMap<String, String> = self
                .inputs
                .pairs()
                .map(|(field, label)| {
                    let value = record.text(field).unwrap_or_default();
                    (label.to_string(), value.to_string())
                })
                .collect();

            let scores = match delegate.score(self.script, self.scores_key, &inputs) {
                Ok(scores) => scores,
                Err(err) => {
                    failures.push(ScoreFailure::new(record, format!("{err:#}")));
                    continue;
                }
            };

            let by_field: BTreeMap<&str, &String> = scores
                .iter()
                .filter_map(|(name, value)| Some((self.results.encode(name)?, value)))
                .collect();

            let mut values = vec![completion_flag(record, self.complete_field)];
            let mut missing = Vec::new();
            for field in self.results.external_names() {
                match by_field.get(field) {
                    Some(value) => values.push((*value).clone()),
                    None => missing.push(format!(
                        "{} ({field})",
                        self.results.decode(field).unwrap_or_default()
                    )),
                }
            }

            if missing.is_empty() {
                table.push(record, values);
            } else {
                failures.push(ScoreFailure::new(
                    record,
                    format!("{} returned no {}", self.script, missing.join(", ")),
                ));
            }
        }

        debug!(
            script = self.script,
            scored = table.rows.len(),
            failed = failures.len(),
            "delegated scoring finished"
        );
        ScoreOutcome::Scored { table, failures }
    }
}
