use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use regex::Regex;

/// REDCap limits field names to 100 characters.
const MAX_FIELD_NAME_LEN: usize = 100;

/// Bidirectional mapping between source-system field names (external) and
/// the names a scoring routine expects (internal).
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    pairs: Vec<(String, String)>,
    to_internal: BTreeMap<String, usize>,
    to_external: BTreeMap<String, usize>,
}

impl FieldMap {
    /// Builds the map from `(external, internal)` pairs, keeping their order.
    /// Repeated names on either side are rejected so the map stays a
    /// bijection.
    pub fn from_pairs<I, E, N>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (E, N)>,
        E: Into<String>,
        N: Into<String>,
    {
        let mut map = Self::default();

        for (external, internal) in pairs {
            let external = external.into();
            let internal = internal.into();
            let index = map.pairs.len();

            if map.to_internal.insert(external.clone(), index).is_some() {
                bail!("duplicate external field name '{external}'");
            }
            if map.to_external.insert(internal.clone(), index).is_some() {
                bail!("duplicate internal field name '{internal}'");
            }
            map.pairs.push((external, internal));
        }

        Ok(map)
    }

    /// Maps REDCap field names of `form` to the LimeSurvey labels they were
    /// derived from.
    pub fn from_survey_labels(form: &str, labels: &[&str]) -> Result<Self> {
        let pairs = labels
            .iter()
            .map(|label| Ok((redcap_field_name(form, label)?, label.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Self::from_pairs(pairs).with_context(|| format!("survey labels for form '{form}' collide"))
    }

    pub fn decode(&self, external: &str) -> Option<&str> {
        self.to_internal
            .get(external)
            .map(|&index| self.pairs[index].1.as_str())
    }

    pub fn encode(&self, internal: &str) -> Option<&str> {
        self.to_external
            .get(internal)
            .map(|&index| self.pairs[index].0.as_str())
    }

    /// `(external, internal)` pairs in declaration order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(external, internal)| (external.as_str(), internal.as_str()))
    }

    pub fn external_names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(external, _)| external.as_str())
    }
}

/// REDCap field name for a LimeSurvey question label, e.g.
/// `cesd_sec1 [cesd1]` on `mrireport` becomes `mrireport_cesd_sec1_cesd1`.
pub fn redcap_field_name(form: &str, label: &str) -> Result<String> {
    let pattern = Regex::new(r"[_\W]+").context("failed to compile field name regex")?;
    let lowered = label.to_lowercase().replace("subjectid", "subject_id");
    let collapsed = pattern.replace_all(&lowered, "_");
    let trimmed = collapsed.trim_matches('_');
    let mut name = format!("{form}_{trimmed}");
    if name.len() > MAX_FIELD_NAME_LEN {
        let mut cut = MAX_FIELD_NAME_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    Ok(name)
}
