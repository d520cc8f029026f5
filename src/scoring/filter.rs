use crate::model::Record;

/// Rows eligible for scoring: completion status strictly above zero and the
/// missing flag not above zero. A row without the completion column counts
/// as incomplete.
pub fn eligible_records<'a>(
    records: &'a [Record],
    complete_field: &str,
    missing_field: &str,
) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|record| {
            record
                .number(complete_field)
                .is_some_and(|status| status > 0.0)
        })
        .filter(|record| {
            !record
                .number(missing_field)
                .is_some_and(|missing| missing > 0.0)
        })
        .collect()
}
