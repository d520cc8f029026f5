use super::*;

fn visit(study_id: &str) -> Record {
    Record::new()
        .with("study_id", study_id)
        .with("redcap_event_name", "1y_visit_arm_1")
        .with("exclude", "")
        .with("visit_ignore___yes", "0")
        .with("visit_date", "2014-03-01")
}

fn with_forms_entered(mut record: Record) -> Record {
    for (missing, value) in FORM_PAIRS {
        record.set(missing, "0");
        record.set(value, "2014-03-01");
    }
    record
}

fn with_np_entered(mut record: Record) -> Record {
    for (missing, value) in NP_PAIRS {
        record.set(missing, "0");
        record.set(value, "12");
    }
    record.set(GPEG_MISSING, "");
    for (exclusion, value) in GPEG_PAIRS {
        record.set(exclusion, "0");
        record.set(value, "61.2");
    }
    record
}

#[test]
fn missing_forms_requires_explicit_not_missing_flag() {
    let complete = with_forms_entered(visit("A-00001-F-1"));
    let undated = with_forms_entered(visit("A-00002-M-2")).with("youthreport2_date", "");
    let flag_blank = with_forms_entered(visit("A-00003-F-1"))
        .with("parentreport_missing", "")
        .with("parentreport_date", "");
    let marked_missing = with_forms_entered(visit("A-00004-M-1"))
        .with("ssage_youth_missing", "1")
        .with("ssage_youth_date", "");

    let findings = missing_forms(&[complete, undated, flag_blank, marked_missing]);

    assert_eq!(
        findings,
        vec![Finding {
            error: "ERROR: Form is missing",
            event_name: "1y_visit_arm_1".to_string(),
            np_missing: Some("youthreport2_missing"),
            subject_site_id: "A-00002-M-2".to_string(),
            visit_date: Some("2014-03-01".to_string()),
        }]
    );
}

#[test]
fn excluded_or_ignored_visits_are_not_reported() {
    let excluded = with_forms_entered(visit("B-00001-F-1"))
        .with("exclude", "1")
        .with("youthreport1_date", "");
    let ignored = with_forms_entered(visit("B-00002-F-1"))
        .with("visit_ignore___yes", "1")
        .with("youthreport1_date", "");
    let unknown_ignore = with_forms_entered(visit("B-00003-F-1"))
        .with("visit_ignore___yes", "")
        .with("youthreport1_date", "");

    assert!(missing_forms(&[excluded, ignored, unknown_ignore]).is_empty());
}

#[test]
fn missing_np_treats_blank_flag_as_not_missing() {
    let record = with_np_entered(visit("C-00001-M-2"))
        .with("pasat_missing", "")
        .with("pasat_date", "")
        .with("stroop_missing", "1")
        .with("stroop_date", "");

    let findings = missing_np(&[record]);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].np_missing, Some("pasat_missing"));
    assert_eq!(findings[0].error, "ERROR: NP is missing.");
}

#[test]
fn pegboard_hands_are_checked_unless_excluded() {
    let dominant_missing = with_np_entered(visit("D-00001-F-1")).with("np_gpeg_dh_time", "");
    let excluded_hand = with_np_entered(visit("D-00002-F-1"))
        .with("np_gpeg_exclusion___ndh", "1")
        .with("np_gpeg_ndh_time", "");
    let pegboard_missing = with_np_entered(visit("D-00003-F-1"))
        .with(GPEG_MISSING, "1")
        .with("np_gpeg_dh_time", "")
        .with("np_gpeg_ndh_time", "");

    let findings = missing_np(&[dominant_missing, excluded_hand, pegboard_missing]);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].subject_site_id, "D-00001-F-1");
    assert_eq!(findings[0].np_missing, Some("np_gpeg_missing"));
}

#[test]
fn findings_serialize_with_sorted_keys() {
    let finding = Finding::new(&visit("E-00001-M-1"), NP_MISSING, Some("dd100_missing"));
    assert_eq!(
        serde_json::to_string(&finding).expect("json"),
        r#"{"error":"ERROR: NP is missing.","event_name":"1y_visit_arm_1","np_missing":"dd100_missing","subject_site_id":"E-00001-M-1","visit_date":"2014-03-01"}"#
    );

    let wais = Finding::new(&visit("E-00001-M-1").with("visit_date", ""), WAIS_UNVERIFIED, None);
    assert_eq!(
        serde_json::to_string(&wais).expect("json"),
        r#"{"error":"ERROR: WAIS score is not verified","event_name":"1y_visit_arm_1","subject_site_id":"E-00001-M-1","visit_date":null}"#
    );
}

#[test]
fn wais_scores_are_unverified_when_correction_matches_computed_score() {
    let wais = |study_id: &str, computed: &str, diff: &str| {
        visit(study_id)
            .with("np_wais4_missing", "0")
            .with(WAIS_COMPUTED, computed)
            .with(WAIS_DIFF, diff)
    };
    let records = vec![
        wais("F-00001-F-1", "3", "3"),
        wais("F-00002-F-1", "0", "0"),
        wais("F-00003-F-1", "3", "2"),
        wais("F-00004-F-1", "", ""),
        wais("F-00005-F-1", "4", "4").with("np_wais4_missing", "1"),
        wais("F-00006-F-1", "4", "4").with("visit_ignore___yes", ""),
    ];

    let flagged: Vec<String> = unverified_wais_scores(&records)
        .into_iter()
        .map(|finding| finding.subject_site_id)
        .collect();
    assert_eq!(flagged, vec!["F-00001-F-1", "F-00006-F-1"]);
}

#[test]
fn np_cases_keep_included_visits_in_column_order() {
    let records = vec![
        Record::new()
            .with("study_id", "G-00001-F-1")
            .with("redcap_event_name", "baseline_visit_arm_1")
            .with("exclude", "0")
            .with("visit_ignore___yes", "0")
            .with("mri_xnat_sid", "NCANDA_S00001")
            .with("mri_xnat_eids", "NCANDA_E00001"),
        Record::new()
            .with("study_id", "G-00002-M-1")
            .with("redcap_event_name", "1y_visit_arm_1")
            .with("exclude", "1"),
        Record::new()
            .with("study_id", "G-00003-M-1")
            .with("redcap_event_name", "1y_visit_arm_1")
            .with("visit_ignore___yes", "1"),
    ];

    assert_eq!(
        case_rows(CaseKind::Np, &records),
        vec![vec![
            "G-00001-F-1",
            "baseline_visit_arm_1",
            "0",
            "0",
            "NCANDA_S00001",
            "NCANDA_E00001"
        ]]
    );
}

#[test]
fn mri_cases_drop_missing_scans() {
    let records = vec![
        Record::new()
            .with("study_id", "H-00001-F-1")
            .with("redcap_event_name", "baseline_visit_arm_1")
            .with("mri_missing", "1"),
        Record::new()
            .with("study_id", "H-00002-F-1")
            .with("redcap_event_name", "1y_visit_arm_1")
            .with("exclude", "")
            .with("mri_missing", "0"),
    ];

    let rows = case_rows(CaseKind::Mri, &records);
    assert_eq!(rows, vec![vec!["H-00002-F-1", "1y_visit_arm_1", "", "0"]]);
    assert_eq!(case_columns(CaseKind::Mri).len(), rows[0].len());
}

#[test]
fn exported_field_lists_cover_every_checked_pair() {
    let np = missing_np_fields();
    for (missing, value) in NP_PAIRS {
        assert!(np.contains(&missing) && np.contains(&value));
    }
    assert!(np.contains(&"np_gpeg_exclusion"));
    assert_eq!(missing_form_fields().len(), 16);
    assert!(wais_fields().contains(&WAIS_DIFF));
}
