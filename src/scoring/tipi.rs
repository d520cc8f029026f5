use anyhow::Result;

use super::delegate::DelegatedScoring;
use super::{FieldMap, InputFields, Instrument, ScoreOutcome, ScoringDelegate};
use crate::model::{Demographics, Record};

const SOURCE_FORM: &str = "youthreport2";

const SURVEY_LABELS: [&str; 10] = [
    "TIPI_sec1 [tipi1]",
    "TIPI_sec1 [tipi2]",
    "TIPI_sec1 [tipi3]",
    "TIPI_sec1 [tipi4]",
    "TIPI_sec1 [tipi5]",
    "TIPI_sec2 [tipi6]",
    "TIPI_sec2 [tipi7]",
    "TIPI_sec2 [tipi8]",
    "TIPI_sec2 [tipi9]",
    "TIPI_sec2 [tipi10]",
];

const RESULT_FIELDS: [(&str, &str); 5] = [
    ("tipi_agv", "Agreeableness"),
    ("tipi_csv", "Conscientiousness"),
    ("tipi_ems", "Emotional Stability"),
    ("tipi_etv", "Extraversion"),
    ("tipi_ope", "Openness to Experiences"),
];

/// Ten-Item Personality Inventory, scored by `TIPI.R`.
pub struct Tipi {
    scoring: DelegatedScoring,
    input_fields: InputFields,
}

impl Tipi {
    pub fn new() -> Result<Self> {
        let inputs = FieldMap::from_survey_labels(SOURCE_FORM, &SURVEY_LABELS)?;
        let results = FieldMap::from_pairs(RESULT_FIELDS)?;

        let scoring = DelegatedScoring {
            complete_field: "youth_report_2_complete",
            missing_field: "youthreport2_missing",
            complete_output: "tipi_complete",
            script: "tipi/TIPI.R",
            scores_key: "TIPI.ary",
            inputs,
            results,
        };

        let input_fields = scoring.input_fields(SOURCE_FORM);

        Ok(Self {
            scoring,
            input_fields,
        })
    }
}

impl Instrument for Tipi {
    fn name(&self) -> &str {
        "tipi"
    }

    fn input_fields(&self) -> &InputFields {
        &self.input_fields
    }

    fn output_fields(&self) -> Vec<String> {
        self.scoring.output_fields()
    }

    fn compute_scores(
        &self,
        records: &[Record],
        _demographics: &Demographics,
        delegate: &dyn ScoringDelegate,
    ) -> ScoreOutcome {
        self.scoring.run(records, delegate)
    }
}
