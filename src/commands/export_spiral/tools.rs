use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tempfile::TempDir;
use walkdir::WalkDir;

use super::ExportError;

/// Captured result of an external tool run.
#[derive(Debug)]
pub(super) struct ToolOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn into_failure(self, program: &str) -> ExportError {
        ExportError::ToolFailed {
            program: program.to_string(),
            status: self.status,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Command used to invoke a tool, with any fixed leading arguments.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub(super) fn run<I, S>(&self, args: I) -> ToolOutput
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args.into_iter().map(Into::into))
            .output();

        match output {
            Ok(output) => ToolOutput {
                success: output.status.success(),
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(err) => ToolOutput {
                success: false,
                status: "not started".to_string(),
                stdout: String::new(),
                stderr: format!("failed to execute {}: {err}", self.program.display()),
            },
        }
    }

    pub(super) fn display_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// External programs used by the spiral export.
#[derive(Debug, Clone)]
pub struct SpiralTools {
    pub tar: ToolCommand,
    pub gzip: ToolCommand,
    pub makenifti: ToolCommand,
    /// Where scratch directories for downloads and extraction are made.
    pub scratch_root: PathBuf,
}

impl SpiralTools {
    pub fn new(makenifti: ToolCommand) -> Self {
        Self {
            tar: ToolCommand::new("tar"),
            gzip: ToolCommand::new("gzip"),
            makenifti,
            scratch_root: std::env::temp_dir(),
        }
    }

    pub(super) fn untar(&self, archive: &Path, out_dir: &Path) -> Result<(), ExportError> {
        let mut directory = OsString::from("--directory=");
        directory.push(out_dir);
        let output = self.tar.run([
            OsString::from("-xzf"),
            archive.as_os_str().to_owned(),
            directory,
        ]);
        if output.success {
            Ok(())
        } else {
            Err(output.into_failure(&self.tar.display_name()))
        }
    }

    /// Compresses `path` in place, leaving `<path>.gz`.
    pub(super) fn gzip(&self, path: &Path) -> Result<PathBuf, ExportError> {
        let output = self.gzip.run([OsString::from("-9"), path.as_os_str().to_owned()]);
        let compressed = with_suffix(path, ".gz");
        if compressed.exists() {
            Ok(compressed)
        } else if output.success {
            Err(ExportError::MissingOutput {
                program: self.gzip.display_name(),
                path: compressed,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            Err(output.into_failure(&self.gzip.display_name()))
        }
    }

    /// Converts a spiral P-file to `<output_base>.nii` and compresses it to
    /// `<output_base>.nii.gz`. Success is judged by that file existing.
    pub(super) fn make_nifti(
        &self,
        spiral_file: &Path,
        output_base: &Path,
    ) -> Result<PathBuf, ExportError> {
        let output = self.makenifti.run([
            OsString::from("-s"),
            OsString::from("0"),
            spiral_file.as_os_str().to_owned(),
            output_base.as_os_str().to_owned(),
        ]);

        let nifti = with_suffix(output_base, ".nii");
        let compressed = with_suffix(output_base, ".nii.gz");
        if nifti.exists() {
            self.gzip(&nifti)?;
        }

        if compressed.exists() {
            Ok(compressed)
        } else {
            Err(ExportError::MissingOutput {
                program: self.makenifti.display_name(),
                path: compressed,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// A scratch directory under `root`, removed when the handle drops.
pub(super) fn scratch_dir(root: &Path, prefix: &str) -> std::io::Result<TempDir> {
    tempfile::Builder::new().prefix(prefix).tempdir_in(root)
}

pub(super) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Shell-style glob (`*`, `?`) compiled to an anchored regex.
fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expression = String::from("^");
    for character in pattern.chars() {
        match character {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression)
}

/// Files under `root` whose name matches `pattern`, sorted by path.
pub(super) fn find_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, ExportError> {
    let matcher = glob_regex(pattern)?;

    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| matcher.is_match(name))
        {
            found.push(entry.into_path());
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_regex_matches_like_fnmatch() {
        let spiral = glob_regex("E*P*.7").expect("pattern");
        assert!(spiral.is_match("E12345P67890.7"));
        assert!(!spiral.is_match("E12345P67890.7.bak"));
        assert!(!spiral.is_match("P67890.7"));

        let physio = glob_regex("P*.physio").expect("pattern");
        assert!(physio.is_match("P12345.physio"));
        assert!(!physio.is_match("xP12345.physio"));
    }

    #[test]
    fn with_suffix_appends_to_the_full_name() {
        assert_eq!(
            with_suffix(Path::new("/out/native/bold4D"), ".nii.gz"),
            PathBuf::from("/out/native/bold4D.nii.gz")
        );
    }
}
