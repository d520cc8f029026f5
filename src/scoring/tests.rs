use std::cell::RefCell;
use std::collections::BTreeMap;

use anyhow::{Result, bail};

use super::field_map::redcap_field_name;
use super::*;
use crate::model::{Demographics, Record};

struct FakeDelegate {
    fail_for: Option<String>,
    calls: RefCell<Vec<BTreeMap<String, String>>>,
    scores: BTreeMap<String, String>,
}

impl FakeDelegate {
    fn returning(scores: &[(&str, &str)]) -> Self {
        Self {
            fail_for: None,
            calls: RefCell::new(Vec::new()),
            scores: scores
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }

    fn failing_for(mut self, marker: &str) -> Self {
        self.fail_for = Some(marker.to_string());
        self
    }
}

impl ScoringDelegate for FakeDelegate {
    fn score(
        &self,
        _script: &str,
        _scores_key: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        self.calls.borrow_mut().push(inputs.clone());
        if let Some(marker) = &self.fail_for {
            if inputs.values().any(|value| value == marker) {
                bail!("R exited with status 1");
            }
        }
        Ok(self.scores.clone())
    }
}

fn youth_report(study_id: &str, complete: &str, missing: &str, items: [u8; 13]) -> Record {
    let mut record = Record::new()
        .with("study_id", study_id)
        .with("redcap_event_name", "baseline_visit_arm_1")
        .with("youth_report_2_complete", complete)
        .with("youthreport2_missing", missing);
    for (index, value) in items.iter().enumerate() {
        record.set(&format!("youthreport2_scsm{}", index + 1), value.to_string());
    }
    record
}

fn mri_report(study_id: &str, complete: &str, item_value: &str) -> Record {
    let cesd = Cesd::new().expect("cesd builds");
    let mut record = Record::new()
        .with("study_id", study_id)
        .with("redcap_event_name", "1y_visit_arm_1")
        .with("mri_report_complete", complete)
        .with("mrireport_missing", "");
    for field in cesd.requested_fields().iter().skip(2) {
        record.set(field, item_value);
    }
    record
}

#[test]
fn eligibility_filter_keeps_only_complete_non_missing_rows() {
    let records = vec![
        Record::new().with("study_id", "a").with("c", "0").with("m", ""),
        Record::new().with("study_id", "b").with("c", "").with("m", ""),
        Record::new().with("study_id", "c").with("m", ""),
        Record::new().with("study_id", "d").with("c", "1").with("m", "1"),
        Record::new().with("study_id", "e").with("c", "1").with("m", "0"),
        Record::new().with("study_id", "f").with("c", "2").with("m", ""),
        Record::new().with("study_id", "g").with("c", "-1").with("m", ""),
    ];

    let kept: Vec<&str> = eligible_records(&records, "c", "m")
        .into_iter()
        .map(|record| record.study_id())
        .collect();
    assert_eq!(kept, vec!["e", "f"]);
}

#[test]
fn scsm_reverse_scores_the_published_items() {
    let all_ones = youth_report("A-00001-F-1", "1", "", [1; 13]);
    assert_eq!(scsm::scsm_total(&all_ones), Ok(43.0));

    let mixed = youth_report(
        "A-00002-M-2",
        "1",
        "",
        [5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 3],
    );
    assert_eq!(scsm::scsm_total(&mixed), Ok(28.0));
}

#[test]
fn scsm_scores_rows_and_copies_completion_as_integer() {
    let records = vec![
        youth_report("A-00001-F-1", "2", "", [1; 13]),
        youth_report("A-00002-M-2", "0", "", [1; 13]),
        youth_report("A-00003-F-3", "1", "1", [1; 13]),
    ];

    let outcome = Scsm::new().compute_scores(
        &records,
        &Demographics::default(),
        &FakeDelegate::returning(&[]),
    );
    let ScoreOutcome::Scored { table, failures } = outcome else {
        panic!("expected scores");
    };

    assert!(failures.is_empty());
    assert_eq!(table.columns, vec!["scsm_complete", "scsm_score"]);
    assert_eq!(table.rows.len(), 1);
    assert_eq!(
        table.get("A-00001-F-1", "baseline_visit_arm_1", "scsm_complete"),
        Some("2")
    );
    assert_eq!(
        table.get("A-00001-F-1", "baseline_visit_arm_1", "scsm_score"),
        Some("43")
    );
}

#[test]
fn scsm_reports_blank_items_instead_of_scoring_them() {
    let mut record = youth_report("A-00004-M-1", "1", "", [3; 13]);
    record.set("youthreport2_scsm7", "");

    let outcome = Scsm::new().compute_scores(
        &[record],
        &Demographics::default(),
        &FakeDelegate::returning(&[]),
    );
    let ScoreOutcome::Scored { table, failures } = outcome else {
        panic!("expected a scored outcome carrying the failure");
    };

    assert!(table.rows.is_empty());
    assert_eq!(failures.len(), 1);
    assert!(failures[0].reason.contains("youthreport2_scsm7"));
}

#[test]
fn no_eligible_rows_is_no_data() {
    let records = vec![youth_report("A-00001-F-1", "0", "", [1; 13])];
    let outcome = Scsm::new().compute_scores(
        &records,
        &Demographics::default(),
        &FakeDelegate::returning(&[]),
    );
    assert_eq!(outcome, ScoreOutcome::NoData);
    assert!(outcome.failures().is_empty());
}

#[test]
fn survey_label_mapping_is_a_bijection() {
    let map = FieldMap::from_survey_labels("mrireport", &["cesd_sec1 [cesd1]", "cesd_sec2 [ces10]"])
        .expect("labels map");

    assert_eq!(map.decode("mrireport_cesd_sec1_cesd1"), Some("cesd_sec1 [cesd1]"));
    for external in map.external_names() {
        let internal = map.decode(external).expect("decodes");
        assert_eq!(map.encode(internal), Some(external));
    }
    assert_eq!(map.decode("mrireport_unknown"), None);
}

#[test]
fn redcap_field_names_follow_label_conversion() {
    assert_eq!(
        redcap_field_name("youthreport2", "TIPI_sec2 [tipi10]").expect("name"),
        "youthreport2_tipi_sec2_tipi10"
    );
    assert_eq!(
        redcap_field_name("youthreport1", "SubjectID").expect("name"),
        "youthreport1_subject_id"
    );
}

#[test]
fn field_map_rejects_collisions() {
    assert!(FieldMap::from_pairs([("a", "x"), ("b", "x")]).is_err());
    assert!(FieldMap::from_pairs([("a", "x"), ("a", "y")]).is_err());
    assert!(FieldMap::from_survey_labels("f", &["Q [a]", "q_a"]).is_err());
}

#[test]
fn cesd_declares_control_columns_first() {
    let cesd = Cesd::new().expect("cesd builds");
    let fields = &cesd.input_fields()["mrireport"];
    assert_eq!(fields.len(), 22);
    assert_eq!(fields[0], "mri_report_complete");
    assert_eq!(fields[1], "mrireport_missing");
    assert!(fields.contains(&"mrireport_cesd_sec3_ces20".to_string()));
    assert_eq!(cesd.output_form(), "clinical");
    assert_eq!(cesd.output_fields(), vec!["cesd_complete", "cesd_score"]);
}

#[test]
fn delegated_instruments_share_the_input_field_layout() {
    let tipi = Tipi::new().expect("tipi builds");
    let fields = &tipi.input_fields()["youthreport2"];
    assert_eq!(tipi.input_fields().len(), 1);
    assert_eq!(fields.len(), 12);
    assert_eq!(fields[..2], ["youth_report_2_complete", "youthreport2_missing"]);
    assert!(fields.contains(&"youthreport2_tipi_sec2_tipi10".to_string()));
}

#[test]
fn delegated_scoring_passes_survey_labels_and_isolates_failures() {
    let records = vec![
        mri_report("C-00001-F-1", "1", "2"),
        mri_report("C-00002-M-1", "2", "9"),
        mri_report("C-00003-F-1", "0", "2"),
    ];
    let delegate =
        FakeDelegate::returning(&[("CES Symptomatology Score", "17")]).failing_for("9");

    let cesd = Cesd::new().expect("cesd builds");
    let outcome = cesd.compute_scores(&records, &Demographics::default(), &delegate);
    let ScoreOutcome::Scored { table, failures } = outcome else {
        panic!("expected scores");
    };

    assert_eq!(delegate.calls.borrow().len(), 2);
    assert_eq!(
        delegate.calls.borrow()[0].get("cesd_sec1 [cesd1]").map(String::as_str),
        Some("2")
    );

    assert_eq!(table.rows.len(), 1);
    assert_eq!(
        table.get("C-00001-F-1", "1y_visit_arm_1", "cesd_score"),
        Some("17")
    );
    assert_eq!(
        table.get("C-00001-F-1", "1y_visit_arm_1", "cesd_complete"),
        Some("1")
    );

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].study_id, "C-00002-M-1");
    assert!(failures[0].reason.contains("status 1"));
}

#[test]
fn delegated_scoring_flags_absent_score_names() {
    let tipi = Tipi::new().expect("tipi builds");
    let record = youth_report("D-00001-M-2", "1", "", [4; 13]);
    let delegate = FakeDelegate::returning(&[("Agreeableness", "4.5")]);

    let outcome = tipi.compute_scores(&[record], &Demographics::default(), &delegate);
    let failures = outcome.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].reason.contains("Conscientiousness"));
}

#[test]
fn tipi_outputs_scores_in_declared_order() {
    let tipi = Tipi::new().expect("tipi builds");
    assert_eq!(
        tipi.output_fields(),
        vec![
            "tipi_complete",
            "tipi_agv",
            "tipi_csv",
            "tipi_ems",
            "tipi_etv",
            "tipi_ope"
        ]
    );
}

#[test]
fn score_table_converts_to_import_records() {
    let mut table = ScoreTable::new(vec!["scsm_complete".into(), "scsm_score".into()]);
    let source = Record::new()
        .with("study_id", "E-00001-F-1")
        .with("redcap_event_name", "2y_visit_arm_1");
    table.push(&source, vec!["1".into(), "40".into()]);

    let records = table.to_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].study_id(), "E-00001-F-1");
    assert_eq!(records[0].event(), "2y_visit_arm_1");
    assert_eq!(records[0].text("scsm_score"), Some("40"));
}

#[test]
fn registry_lists_every_instrument() {
    let names: Vec<String> = all_instruments()
        .expect("instruments build")
        .iter()
        .map(|instrument| instrument.name().to_string())
        .collect();
    assert_eq!(names, vec!["cesd", "scsm", "tipi"]);
}

#[cfg(unix)]
mod rscript {
    use std::fs;

    use super::*;

    fn delegate_with_script(body: &str) -> (tempfile::TempDir, RscriptDelegate) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("cesd")).expect("script dir");
        fs::write(dir.path().join("cesd/CES_D.R"), body).expect("script");
        let delegate = RscriptDelegate::new("sh", dir.path());
        (dir, delegate)
    }

    #[test]
    fn reads_scores_written_by_the_script() {
        let (_dir, delegate) = delegate_with_script(
            "test \"$3\" = CES.ary || exit 3\nprintf '{\"CES Symptomatology Score\": 12}' > \"$2\"\n",
        );
        let inputs = BTreeMap::from([("cesd_sec1 [cesd1]".to_string(), "1".to_string())]);

        let scores = delegate
            .score("cesd/CES_D.R", "CES.ary", &inputs)
            .expect("script succeeds");
        assert_eq!(
            scores.get("CES Symptomatology Score").map(String::as_str),
            Some("12")
        );
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let (_dir, delegate) = delegate_with_script("echo boom >&2\nexit 2\n");
        let err = delegate
            .score("cesd/CES_D.R", "CES.ary", &BTreeMap::new())
            .expect_err("must fail");
        assert!(format!("{err:#}").contains("boom"));
    }

    #[test]
    fn zero_exit_without_output_is_an_error() {
        let (_dir, delegate) = delegate_with_script("exit 0\n");
        let err = delegate
            .score("cesd/CES_D.R", "CES.ary", &BTreeMap::new())
            .expect_err("must fail");
        assert!(err.to_string().contains("did not write"));
    }
}
