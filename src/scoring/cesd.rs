use anyhow::Result;

use super::delegate::DelegatedScoring;
use super::{FieldMap, InputFields, Instrument, ScoreOutcome, ScoringDelegate};
use crate::model::{Demographics, Record};

const SOURCE_FORM: &str = "mrireport";

const SURVEY_LABELS: [&str; 20] = [
    "cesd_sec1 [cesd1]",
    "cesd_sec1 [cesd2]",
    "cesd_sec1 [cesd3]",
    "cesd_sec1 [cesd4]",
    "cesd_sec1 [cesd5]",
    "cesd_sec1 [cesd6]",
    "cesd_sec2 [cesd7]",
    "cesd_sec2 [cesd8]",
    "cesd_sec2 [cesd9]",
    "cesd_sec2 [ces10]",
    "cesd_sec2 [ces11]",
    "cesd_sec2 [ces12]",
    "cesd_sec3 [ces13]",
    "cesd_sec3 [ces14]",
    "cesd_sec3 [ces15]",
    "cesd_sec3 [ces16]",
    "cesd_sec3 [ces17]",
    "cesd_sec3 [ces18]",
    "cesd_sec3 [ces19]",
    "cesd_sec3 [ces20]",
];

/// Center for Epidemiologic Studies Depression scale, scored by `CES_D.R`.
pub struct Cesd {
    scoring: DelegatedScoring,
    input_fields: InputFields,
}

impl Cesd {
    pub fn new() -> Result<Self> {
        let inputs = FieldMap::from_survey_labels(SOURCE_FORM, &SURVEY_LABELS)?;
        let results = FieldMap::from_pairs([("cesd_score", "CES Symptomatology Score")])?;

        let scoring = DelegatedScoring {
            complete_field: "mri_report_complete",
            missing_field: "mrireport_missing",
            complete_output: "cesd_complete",
            script: "cesd/CES_D.R",
            scores_key: "CES.ary",
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

impl Instrument for Cesd {
    fn name(&self) -> &str {
        "cesd"
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
