use super::{
    InputFields, Instrument, ScoreFailure, ScoreOutcome, ScoreTable, ScoringDelegate,
    completion_flag, eligible_records,
};
use crate::model::{Demographics, Record};
use crate::util::format_number;

const SOURCE_FORM: &str = "youthreport2";
const COMPLETE_FIELD: &str = "youth_report_2_complete";
const MISSING_FIELD: &str = "youthreport2_missing";
const COMPLETE_OUTPUT: &str = "scsm_complete";
const SCORE_OUTPUT: &str = "scsm_score";

/// Scoring key per item as `(field, offset, sign)`; an item contributes
/// `offset + sign * value`. Reverse-scored items use a 6 or 5 offset.
const SCORING_KEY: [(&str, f64, f64); 13] = [
    ("youthreport2_scsm1", 6.0, -1.0),
    ("youthreport2_scsm2", 6.0, -1.0),
    ("youthreport2_scsm3", 0.0, 1.0),
    ("youthreport2_scsm4", 0.0, 1.0),
    ("youthreport2_scsm5", 0.0, 1.0),
    ("youthreport2_scsm6", 5.0, -1.0),
    ("youthreport2_scsm7", 6.0, -1.0),
    ("youthreport2_scsm8", 5.0, -1.0),
    ("youthreport2_scsm9", 5.0, -1.0),
    ("youthreport2_scsm10", 5.0, -1.0),
    ("youthreport2_scsm11", 0.0, 1.0),
    ("youthreport2_scsm12", 5.0, -1.0),
    ("youthreport2_scsm13", 5.0, -1.0),
];

/// Self-Control Scale, scored inline from the thirteen Youth Report 2 items.
pub struct Scsm {
    input_fields: InputFields,
}

impl Scsm {
    pub fn new() -> Self {
        let mut fields = vec![COMPLETE_FIELD.to_string(), MISSING_FIELD.to_string()];
        fields.extend(SCORING_KEY.iter().map(|(field, _, _)| field.to_string()));
        Self {
            input_fields: InputFields::from([(SOURCE_FORM.to_string(), fields)]),
        }
    }
}

/// Total score of one row, or the items that were blank or non-numeric.
pub fn scsm_total(record: &Record) -> Result<f64, Vec<&'static str>> {
    let mut total = 0.0;
    let mut missing = Vec::new();

    for (field, offset, sign) in SCORING_KEY {
        match record.number(field) {
            Some(value) => total += offset + sign * value,
            None => missing.push(field),
        }
    }

    if missing.is_empty() {
        Ok(total)
    } else {
        Err(missing)
    }
}

impl Instrument for Scsm {
    fn name(&self) -> &str {
        "scsm"
    }

    fn input_fields(&self) -> &InputFields {
        &self.input_fields
    }

    fn output_fields(&self) -> Vec<String> {
        vec![COMPLETE_OUTPUT.to_string(), SCORE_OUTPUT.to_string()]
    }

    fn compute_scores(
        &self,
        records: &[Record],
        _demographics: &Demographics,
        _delegate: &dyn ScoringDelegate,
    ) -> ScoreOutcome {
        let eligible = eligible_records(records, COMPLETE_FIELD, MISSING_FIELD);
        if eligible.is_empty() {
            return ScoreOutcome::NoData;
        }

        let mut table = ScoreTable::new(self.output_fields());
        let mut failures = Vec::new();

        for record in eligible {
            match scsm_total(record) {
                Ok(total) => table.push(
                    record,
                    vec![completion_flag(record, COMPLETE_FIELD), format_number(total)],
                ),
                Err(missing) => failures.push(ScoreFailure::new(
                    record,
                    format!("blank or non-numeric items: {}", missing.join(", ")),
                )),
            }
        }

        ScoreOutcome::Scored { table, failures }
    }
}
