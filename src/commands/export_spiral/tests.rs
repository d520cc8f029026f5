#![cfg(unix)]

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tempfile::TempDir;

use super::*;
use crate::cli::XnatArgs;

const RESOURCE: &str = "NCANDA_E01234/5678/pfiles.tar.gz";
const STROOP: &str = "NCANDA_E01234/9/NCANDAStroopMtS_3cycles_7m53stask_x.txt";

/// Serves local files by resource file name.
#[derive(Default)]
struct LocalResources {
    files: BTreeMap<String, PathBuf>,
}

impl LocalResources {
    fn serving(mut self, file_name: &str, path: PathBuf) -> Self {
        self.files.insert(file_name.to_string(), path);
        self
    }
}

impl ResourceSource for LocalResources {
    fn copy_file(&self, location: &ResourceLocation, dest: &Path) -> Result<PathBuf> {
        let path = self
            .files
            .get(&location.file_name)
            .with_context(|| format!("no such file: {location}"))?;
        fs::copy(path, dest).with_context(|| format!("copy {}", path.display()))?;
        Ok(dest.to_path_buf())
    }

    fn list_files(&self, experiment_id: &str) -> Result<Vec<ResourceLocation>> {
        Ok(self
            .files
            .keys()
            .map(|file_name| ResourceLocation {
                experiment_id: experiment_id.to_string(),
                resource_id: "1".to_string(),
                file_name: file_name.clone(),
            })
            .collect())
    }
}

struct Fixture {
    dir: TempDir,
    tools: SpiralTools,
}

impl Fixture {
    /// makenifti stand-in: copies the P-file to `<base>.nii`.
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("makenifti.sh");
        fs::write(&script, "cp \"$3\" \"$4.nii\"\n").expect("write script");
        let makenifti = ToolCommand {
            program: PathBuf::from("sh"),
            leading_args: vec![OsString::from(script.as_os_str())],
        };
        let mut tools = SpiralTools::new(makenifti);
        tools.scratch_root = dir.path().join("scratch");
        fs::create_dir(&tools.scratch_root).expect("scratch root");
        Self { dir, tools }
    }

    fn archive(&self, files: &[&str]) -> LocalResources {
        let content = self.dir.path().join("content");
        fs::create_dir_all(&content).expect("content dir");
        for name in files {
            fs::write(content.join(name), name.as_bytes()).expect("content file");
        }
        let path = self.dir.path().join("pfiles.tar.gz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&path)
            .arg("-C")
            .arg(&content)
            .arg(".")
            .status()
            .expect("run tar");
        assert!(status.success());
        LocalResources::default().serving("pfiles.tar.gz", path)
    }

    /// UTF-16LE ePrime log with a byte-order mark.
    fn stroop_log(&self, text: &str) -> PathBuf {
        let log = self.dir.path().join("stroop.txt");
        let mut raw = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(&log, raw).expect("log");
        log
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("subject")
    }

    fn scratch_entries(&self) -> usize {
        fs::read_dir(&self.tools.scratch_root)
            .expect("scratch root")
            .count()
    }

    fn session_args(&self, stroop: Option<&str>) -> ExportSpiralArgs {
        ExportSpiralArgs {
            resource: RESOURCE.to_string(),
            to: self.output(),
            stroop: stroop.map(ToOwned::to_owned),
            stroop_experiments: Vec::new(),
            xnat: XnatArgs::default(),
        }
    }
}

fn native_files(to: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(to.join("native"))
        .map(|entries| {
            entries
                .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn single_spiral_file_becomes_compressed_nifti() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["E12345P67890.7", "notes.txt"]);
    let to = fixture.output();

    let outcome =
        export_spiral_files(&source, &fixture.tools, RESOURCE, &to).expect("export succeeds");

    assert_eq!(outcome, SpiralOutcome::Exported { physio: false });
    assert_eq!(native_files(&to), vec!["bold4D.nii.gz"]);
}

#[test]
fn physio_file_is_copied_and_compressed() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["E12345P67890.7", "P67890.physio"]);
    let to = fixture.output();

    let outcome =
        export_spiral_files(&source, &fixture.tools, RESOURCE, &to).expect("export succeeds");

    assert_eq!(outcome, SpiralOutcome::Exported { physio: true });
    assert_eq!(native_files(&to), vec!["bold4D.nii.gz", "physio.gz"]);
}

#[test]
fn two_spiral_files_fail_without_writing_output() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["E1P1.7", "E2P2.7"]);
    let to = fixture.output();

    let err = export_spiral_files(&source, &fixture.tools, RESOURCE, &to)
        .expect_err("ambiguous archive");

    assert!(matches!(err, ExportError::Cardinality { ref found, .. } if found.len() == 2));
    assert!(err.to_string().contains("E*P*.7"));
    assert!(native_files(&to).is_empty());
}

#[test]
fn archive_without_spiral_file_is_an_error() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["P67890.physio"]);

    let err = export_spiral_files(&source, &fixture.tools, RESOURCE, &fixture.output())
        .expect_err("no spiral file");
    assert!(matches!(err, ExportError::Cardinality { kind: "spiral", .. }));
}

#[test]
fn existing_nifti_short_circuits_the_fetch() {
    let fixture = Fixture::new();
    let to = fixture.output();
    fs::create_dir_all(to.join("native")).expect("native dir");
    fs::write(to.join("native/bold4D.nii.gz"), b"done").expect("existing nifti");
    let source = LocalResources::default();

    let outcome =
        export_spiral_files(&source, &fixture.tools, RESOURCE, &to).expect("nothing to do");
    assert_eq!(outcome, SpiralOutcome::AlreadyPresent);
}

#[test]
fn malformed_resource_location_is_rejected() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["E1P1.7"]);

    let err = export_spiral_files(&source, &fixture.tools, "NCANDA_E01234/5678", &fixture.output())
        .expect_err("two segments");
    assert!(matches!(err, ExportError::Location(_)));
}

#[test]
fn stroop_log_is_written_once_as_utf8() {
    let fixture = Fixture::new();
    let location: ResourceLocation = STROOP.parse().expect("location");
    let source = LocalResources::default()
        .serving(&location.file_name, fixture.stroop_log("*** Header Start ***"));
    let to = fixture.output();
    let scratch = &fixture.tools.scratch_root;

    let first = export_stroop_file(&source, &location, &to, scratch).expect("export stroop");
    assert_eq!(first, StroopOutcome::Exported);
    assert_eq!(
        fs::read_to_string(to.join("native/stroop.txt")).expect("stroop.txt"),
        "*** Header Start ***"
    );

    let second = export_stroop_file(&source, &location, &to, scratch).expect("second run");
    assert_eq!(second, StroopOutcome::AlreadyPresent);
    assert_eq!(fixture.scratch_entries(), 0);
}

#[test]
fn failed_spiral_export_leaves_no_scratch_directory() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["E1P1.7", "E2P2.7"]);

    export_spiral_files(&source, &fixture.tools, RESOURCE, &fixture.output())
        .expect_err("ambiguous archive");
    assert_eq!(fixture.scratch_entries(), 0);

    let missing = LocalResources::default();
    let err = export_spiral_files(&missing, &fixture.tools, RESOURCE, &fixture.output())
        .expect_err("archive not served");
    assert!(matches!(err, ExportError::Fetch { .. }));
    assert_eq!(fixture.scratch_entries(), 0);
}

#[test]
fn failed_stroop_export_leaves_no_scratch_directory() {
    let fixture = Fixture::new();
    let location: ResourceLocation = STROOP.parse().expect("location");

    let err = export_stroop_file(
        &LocalResources::default(),
        &location,
        &fixture.output(),
        &fixture.tools.scratch_root,
    )
    .expect_err("log not served");

    assert!(matches!(err, ExportError::Fetch { .. }));
    assert_eq!(fixture.scratch_entries(), 0);
    assert!(native_files(&fixture.output()).is_empty());
}

#[test]
fn stroop_is_exported_even_when_spiral_export_fails() {
    let fixture = Fixture::new();
    let source = fixture
        .archive(&["E1P1.7", "E2P2.7"])
        .serving(
            "NCANDAStroopMtS_3cycles_7m53stask_x.txt",
            fixture.stroop_log("*** Header Start ***"),
        );
    let args = fixture.session_args(Some(STROOP));

    let err = export_session(&source, &fixture.tools, &args).expect_err("spiral fails");

    assert!(format!("{err:#}").contains("spiral export failed for"));
    assert_eq!(native_files(&args.to), vec!["stroop.txt"]);
    assert_eq!(fixture.scratch_entries(), 0);
}

#[test]
fn session_export_writes_spiral_and_stroop() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["E12345P67890.7"]).serving(
        "NCANDAStroopMtS_3cycles_7m53stask_x.txt",
        fixture.stroop_log("*** Header Start ***"),
    );
    let mut args = fixture.session_args(None);
    args.stroop_experiments = vec!["NCANDA_E01234".to_string()];

    export_session(&source, &fixture.tools, &args).expect("session export");

    assert_eq!(native_files(&args.to), vec!["bold4D.nii.gz", "stroop.txt"]);
}

#[test]
fn session_export_fails_when_only_stroop_fails() {
    let fixture = Fixture::new();
    let source = fixture.archive(&["E12345P67890.7"]);
    let args = fixture.session_args(Some(STROOP));

    let err = export_session(&source, &fixture.tools, &args).expect_err("stroop missing");

    assert!(format!("{err:#}").contains("stroop export failed for"));
    assert_eq!(native_files(&args.to), vec!["bold4D.nii.gz"]);
}
