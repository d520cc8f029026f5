use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, error};

use super::{ExportError, StroopOutcome};
use crate::xnat::{ResourceLocation, ResourceSource};

const STROOP_FILE_PATTERN: &str = r"^NCANDAStroopMtS_3cycles_7m53stask_.*.txt$";

/// Finds the single Stroop ePrime log across the given experiments. No
/// match is `None`; several matches are an error because the session is
/// ambiguous.
pub fn find_stroop_file(
    source: &dyn ResourceSource,
    experiment_ids: &[String],
) -> Result<Option<ResourceLocation>> {
    let mut files = Vec::new();
    for experiment_id in experiment_ids {
        files.extend(
            source
                .list_files(experiment_id)
                .with_context(|| format!("failed to list resources of {experiment_id}"))?,
        );
    }
    select_stroop_file(files, experiment_ids)
}

fn select_stroop_file(
    files: Vec<ResourceLocation>,
    experiment_ids: &[String],
) -> Result<Option<ResourceLocation>> {
    let pattern = Regex::new(STROOP_FILE_PATTERN).context("failed to compile stroop regex")?;
    let mut matches: Vec<ResourceLocation> = files
        .into_iter()
        .filter(|file| {
            let name = file.file_name.rsplit('/').next().unwrap_or_default();
            pattern.is_match(name)
        })
        .collect();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        count => {
            error!(
                experiments = %experiment_ids.join(","),
                count,
                "more than one Stroop .txt file; expected exactly one per session"
            );
            bail!(
                "experiment(s) {} have {count} Stroop .txt files, expected exactly one",
                experiment_ids.join(",")
            )
        }
    }
}

/// Copies the Stroop log to `<to>/native/stroop.txt` as UTF-8 unless it is
/// already there.
pub fn export_stroop_file(
    source: &dyn ResourceSource,
    location: &ResourceLocation,
    to_directory: &Path,
    scratch_root: &Path,
) -> Result<StroopOutcome, ExportError> {
    let native_dir = to_directory.join("native");
    let stroop_out = native_dir.join("stroop.txt");
    if stroop_out.exists() {
        return Ok(StroopOutcome::AlreadyPresent);
    }

    let scratch = super::tools::scratch_dir(scratch_root, "ncanda_stroop_")?;
    let download_name = location
        .file_name
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("stroop.txt");
    let downloaded = source
        .copy_file(location, &scratch.path().join(download_name))
        .map_err(|err| ExportError::Fetch {
            location: location.to_string(),
            message: format!("{err:#}"),
        })?;

    let raw = fs::read(&downloaded)?;
    fs::create_dir_all(&native_dir)?;
    fs::write(&stroop_out, decode_eprime_text(&raw))?;
    debug!(path = %stroop_out.display(), "wrote stroop log");

    Ok(StroopOutcome::Exported)
}

/// ePrime writes its logs as UTF-16 with a byte-order mark; anything without
/// a UTF-16 BOM is read as UTF-8.
pub(super) fn decode_eprime_text(raw: &[u8]) -> String {
    let utf16 = |bytes: &[u8], from_bytes: fn([u8; 2]) -> u16| {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| from_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    };

    match raw {
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}
