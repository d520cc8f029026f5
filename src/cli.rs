use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "ncanda",
    version,
    about = "NCANDA data integration tooling for REDCap, XNAT and GitHub"
)]
pub struct Cli {
    /// Path to the TOML server configuration.
    #[arg(long, global = true, env = "NCANDA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score survey instruments and import results into REDCap.
    Score(ScoreArgs),
    /// Export spiral fMRI (and Stroop) files from an XNAT resource.
    ExportSpiral(ExportSpiralArgs),
    /// Lock or unlock a REDCap form for every record of an event.
    LockForm(LockFormArgs),
    /// Report lock timestamps of forms for a single subject.
    LockReport(LockReportArgs),
    /// File GitHub issues from a captured error log.
    PostIssues(PostIssuesArgs),
    /// Generate QC reports from REDCap exports.
    Report(ReportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RedcapArgs {
    #[arg(long, env = "REDCAP_API_URL")]
    pub redcap_url: Option<String>,

    #[arg(long, env = "REDCAP_TOKEN", hide_env_values = true)]
    pub redcap_token: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct XnatArgs {
    #[arg(long, env = "XNAT_SERVER")]
    pub xnat_server: Option<String>,

    #[arg(long, env = "XNAT_USER")]
    pub xnat_user: Option<String>,

    #[arg(long, env = "XNAT_PASSWORD", hide_env_values = true)]
    pub xnat_password: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ScoreArgs {
    #[command(flatten)]
    pub redcap: RedcapArgs,

    /// Instruments to score; all registered instruments when omitted.
    #[arg(long = "instrument")]
    pub instruments: Vec<String>,

    /// Restrict the export to these REDCap events.
    #[arg(long = "event")]
    pub events: Vec<String>,

    /// Print score rows as JSON lines instead of importing them.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportSpiralArgs {
    /// Spiral resource as <experiment-id>/<resource-id>/<filename>.
    #[arg(long)]
    pub resource: String,

    /// Subject output directory; files land in <to>/native.
    #[arg(long)]
    pub to: PathBuf,

    /// Stroop ePrime file as <experiment-id>/<resource-id>/<filename>.
    #[arg(long, conflicts_with = "stroop_experiments")]
    pub stroop: Option<String>,

    /// Experiments to search for the Stroop ePrime log.
    #[arg(long = "stroop-experiment")]
    pub stroop_experiments: Vec<String>,

    #[command(flatten)]
    pub xnat: XnatArgs,
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("action").required(true).args(["lock", "unlock"])))]
pub struct LockFormArgs {
    /// Project name in lowercase_underscore.
    #[arg(short, long)]
    pub project: String,

    /// Arm name as it appears in the UI.
    #[arg(short, long)]
    pub arm: String,

    /// Event name as it appears in the UI.
    #[arg(short, long)]
    pub event: String,

    /// Form name in lowercase_underscore.
    #[arg(short, long)]
    pub form: String,

    /// User name with locking permissions.
    #[arg(short, long)]
    pub username: Option<String>,

    #[arg(short, long, default_value = "/tmp/locked_records.csv")]
    pub outfile: PathBuf,

    #[arg(long, default_value_t = false)]
    pub lock: bool,

    #[arg(long, default_value_t = false)]
    pub unlock: bool,

    /// REDCap database: a mysql:// URL, or a SQLite copy of its tables.
    #[arg(long, env = "REDCAP_LOCKING_DB", hide_env_values = true)]
    pub locking_db: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct LockReportArgs {
    #[arg(long)]
    pub site_id: String,

    #[arg(long)]
    pub xnat_id: String,

    #[arg(long = "form", required = true)]
    pub forms: Vec<String>,

    #[arg(long)]
    pub project: String,

    #[arg(long)]
    pub arm: String,

    #[arg(long)]
    pub event: String,

    #[arg(long, env = "REDCAP_LOCKING_DB", hide_env_values = true)]
    pub locking_db: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PostIssuesArgs {
    /// GitHub organization.
    #[arg(short, long)]
    pub org: String,

    /// GitHub repository.
    #[arg(short, long)]
    pub repo: String,

    /// Issue title with the label in parentheses.
    #[arg(short, long)]
    pub title: String,

    /// File holding the captured error output.
    #[arg(short, long)]
    pub body: PathBuf,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[command(flatten)]
    pub redcap: RedcapArgs,

    #[command(subcommand)]
    pub kind: ReportKind,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ReportKind {
    /// CSV of questionnaires that have not been entered.
    MissingForms {
        #[arg(long, default_value = "1y_visit_arm_1")]
        event: String,

        #[arg(long, default_value = "missing_form.csv")]
        outfile: PathBuf,
    },
    /// JSON lines for neuropsych assessments that have not been entered.
    MissingNp {
        #[arg(long, default_value = "1y_visit_arm_1")]
        event: String,
    },
    /// JSON lines for WAIS raw scores that do not verify.
    WaisVerification {
        #[arg(long, default_value = "1y_visit_arm_1")]
        event: String,
    },
    /// CSV of included baseline and follow-up cases.
    Cases {
        #[arg(long, value_enum, default_value_t = CaseKind::Np)]
        kind: CaseKind,

        #[arg(long)]
        outfile: Option<PathBuf>,
    },
    /// CSV of MR sessions with incomplete neuroradiology findings.
    Neurorad(NeuroradArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NeuroradArgs {
    /// JSON array of exported MR session rows.
    #[arg(long)]
    pub experiments: PathBuf,

    #[arg(long, default_value = "/tmp/neurorad_findings.csv")]
    pub outfile: PathBuf,

    /// Also flag sessions whose DVD was made before this date (YYYY-MM-DD).
    #[arg(long)]
    pub before_date: Option<NaiveDate>,

    /// Set the findings date to the DVD date on XNAT where it is missing.
    #[arg(long, default_value_t = false)]
    pub update_findings_date: bool,

    #[command(flatten)]
    pub xnat: XnatArgs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CaseKind {
    Np,
    Mri,
}

impl CaseKind {
    pub fn default_outfile(self) -> &'static str {
        match self {
            Self::Np => "baseline_y1_np_case.csv",
            Self::Mri => "baseline_1yr_cases.csv",
        }
    }
}
