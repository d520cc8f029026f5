//! Export of spiral fMRI data (and the matching Stroop ePrime log) from an
//! XNAT resource into a subject's `native` directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cli::ExportSpiralArgs;
use crate::config::Config;
use crate::xnat::{ResourceLocation, ResourceSource, XnatClient};

mod stroop;
#[cfg(test)]
mod tests;
mod tools;

pub use stroop::{export_stroop_file, find_stroop_file};
pub use tools::{SpiralTools, ToolCommand};

const SPIRAL_PATTERN: &str = "E*P*.7";
const PHYSIO_PATTERN: &str = "P*.physio";
const NIFTI_BASENAME: &str = "bold4D";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid resource location: {0}")]
    Location(String),

    #[error("failed to fetch {location}: {message}")]
    Fetch { location: String, message: String },

    #[error(
        "expected {expected} {kind} file matching '{pattern}' in {location}, found {}{}",
        found.len(),
        format_found(found)
    )]
    Cardinality {
        kind: &'static str,
        expected: &'static str,
        pattern: &'static str,
        location: String,
        found: Vec<PathBuf>,
    },

    #[error("{program} failed ({status})\nstderr:\n{stderr}\nstdout:\n{stdout}")]
    ToolFailed {
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("{program} did not produce {}\nstderr:\n{stderr}\nstdout:\n{stdout}", path.display())]
    MissingOutput {
        program: String,
        path: PathBuf,
        stdout: String,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

fn format_found(found: &[PathBuf]) -> String {
    found
        .iter()
        .map(|path| format!("\n  {}", path.display()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiralOutcome {
    Exported { physio: bool },
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StroopOutcome {
    Exported,
    AlreadyPresent,
}

pub fn run(args: ExportSpiralArgs, config: &Config) -> Result<()> {
    let xnat = XnatClient::from_args(&args.xnat, config)?;
    let mut tools = SpiralTools::new(ToolCommand::new(&config.spiral.makenifti));
    if let Some(scratch_dir) = &config.spiral.scratch_dir {
        tools.scratch_root = scratch_dir.clone();
    }
    export_session(&xnat, &tools, &args)
}

/// Runs the spiral export and then the Stroop export. A spiral failure does
/// not stop the Stroop file from being exported; it is returned afterwards.
pub fn export_session(
    source: &dyn ResourceSource,
    tools: &SpiralTools,
    args: &ExportSpiralArgs,
) -> Result<()> {
    let spiral = export_spiral_files(source, tools, &args.resource, &args.to)
        .with_context(|| format!("spiral export failed for {}", args.resource));
    match &spiral {
        Ok(SpiralOutcome::Exported { physio }) => {
            info!(resource = %args.resource, physio, to = %args.to.display(), "exported spiral data")
        }
        Ok(SpiralOutcome::AlreadyPresent) => {
            info!(to = %args.to.display(), "spiral NIfTI already present")
        }
        Err(_) => warn!(resource = %args.resource, "spiral export failed, continuing with stroop"),
    }

    let stroop = export_session_stroop(source, tools, args);
    match (spiral, stroop) {
        (Err(spiral_err), Err(stroop_err)) => {
            error!(error = %format!("{stroop_err:#}"), "stroop export failed");
            Err(spiral_err)
        }
        (Err(err), Ok(())) | (Ok(_), Err(err)) => Err(err),
        (Ok(_), Ok(())) => Ok(()),
    }
}

fn export_session_stroop(
    source: &dyn ResourceSource,
    tools: &SpiralTools,
    args: &ExportSpiralArgs,
) -> Result<()> {
    let stroop = match args.stroop.as_deref() {
        Some(location) => Some(
            location
                .parse::<ResourceLocation>()
                .map_err(|err| ExportError::Location(format!("{err:#}")))?,
        ),
        None if !args.stroop_experiments.is_empty() => {
            find_stroop_file(source, &args.stroop_experiments)?
        }
        None => None,
    };

    if let Some(location) = stroop {
        let outcome = export_stroop_file(source, &location, &args.to, &tools.scratch_root)
            .with_context(|| format!("stroop export failed for {location}"))?;
        info!(resource = %location, outcome = ?outcome, "stroop file handled");
    }
    Ok(())
}

/// Exports `bold4D.nii.gz` (and `physio.gz` when present) for one spiral
/// resource. Nothing is fetched if the NIfTI already exists.
pub fn export_spiral_files(
    source: &dyn ResourceSource,
    tools: &SpiralTools,
    resource_location: &str,
    to_directory: &Path,
) -> Result<SpiralOutcome, ExportError> {
    let native_dir = to_directory.join("native");
    let nifti_base = native_dir.join(NIFTI_BASENAME);
    if tools::with_suffix(&nifti_base, ".nii.gz").exists() {
        return Ok(SpiralOutcome::AlreadyPresent);
    }

    let location: ResourceLocation = resource_location
        .parse()
        .map_err(|err: anyhow::Error| ExportError::Location(format!("{err:#}")))?;

    // Dropping the TempDir removes it on every return path.
    let scratch = tools::scratch_dir(&tools.scratch_root, "ncanda_spiral_")?;
    export_into(source, tools, &location, scratch.path(), &native_dir, &nifti_base)
}

fn export_into(
    source: &dyn ResourceSource,
    tools: &SpiralTools,
    location: &ResourceLocation,
    scratch: &Path,
    native_dir: &Path,
    nifti_base: &Path,
) -> Result<SpiralOutcome, ExportError> {
    let archive = source
        .copy_file(location, &scratch.join("pfiles.tar.gz"))
        .map_err(|err| ExportError::Fetch {
            location: location.to_string(),
            message: format!("{err:#}"),
        })?;

    tools.untar(&archive, scratch)?;

    let spiral_files = tools::find_files(scratch, SPIRAL_PATTERN)?;
    let physio_files = tools::find_files(scratch, PHYSIO_PATTERN)?;
    debug!(
        spiral = spiral_files.len(),
        physio = physio_files.len(),
        "searched extracted archive"
    );

    if spiral_files.len() != 1 {
        return Err(ExportError::Cardinality {
            kind: "spiral",
            expected: "exactly one",
            pattern: SPIRAL_PATTERN,
            location: location.to_string(),
            found: spiral_files,
        });
    }
    if physio_files.len() > 1 {
        return Err(ExportError::Cardinality {
            kind: "physio",
            expected: "at most one",
            pattern: PHYSIO_PATTERN,
            location: location.to_string(),
            found: physio_files,
        });
    }

    fs::create_dir_all(native_dir)?;
    tools.make_nifti(&spiral_files[0], nifti_base)?;

    let physio = match physio_files.first() {
        Some(physio_file) => {
            let physio_out = native_dir.join("physio");
            fs::copy(physio_file, &physio_out)?;
            tools.gzip(&physio_out)?;
            true
        }
        None => false,
    };

    Ok(SpiralOutcome::Exported { physio })
}
