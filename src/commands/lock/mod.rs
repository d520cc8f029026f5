//! REDCap form locking. Locks live in `redcap_locking_data` of the REDCap
//! MySQL database; a SQLite copy of the same tables also works.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::cli::{LockFormArgs, LockReportArgs};
use crate::config::{self, Config};
use crate::util::{local_timestamp_string, write_csv, write_csv_file};

mod mysql;
mod sqlite;

pub use mysql::MysqlLocks;
pub use sqlite::SqliteLocks;

/// Resolved REDCap identifiers for one event of one arm of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKey {
    pub project_id: i64,
    pub arm_id: i64,
    pub event_id: i64,
}

/// The REDCap tables behind form locking.
pub trait LockStore {
    fn project_ids(&mut self, project_name: &str) -> Result<Vec<i64>>;

    fn arm_ids(&mut self, project_id: i64, arm_name: &str) -> Result<Vec<i64>>;

    fn event_ids(&mut self, arm_id: i64, descrip: &str) -> Result<Vec<i64>>;

    /// Distinct record ids with data in the event, sorted.
    fn event_records(&mut self, key: EventKey) -> Result<Vec<String>>;

    /// Deletes every lock on `form_name` in the event and inserts one per
    /// record, as a single transaction. Returns the number of locks deleted.
    fn replace_locks(
        &mut self,
        key: EventKey,
        form_name: &str,
        records: &[String],
        username: &str,
        timestamp: &str,
    ) -> Result<usize>;

    fn clear_locks(&mut self, key: EventKey, form_name: &str) -> Result<usize>;

    /// Newest lock timestamp of `form_name` for one record.
    fn lock_timestamp(
        &mut self,
        key: EventKey,
        record: &str,
        form_name: &str,
    ) -> Result<Option<String>>;
}

/// Where the locking tables are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockBackend {
    Mysql(String),
    Sqlite(PathBuf),
}

impl LockBackend {
    pub fn parse(location: &str) -> Self {
        if location.starts_with("mysql://") || location.starts_with("mariadb://") {
            Self::Mysql(location.to_string())
        } else {
            Self::Sqlite(PathBuf::from(location.strip_prefix("sqlite://").unwrap_or(location)))
        }
    }

    pub fn open(&self) -> Result<Box<dyn LockStore>> {
        match self {
            Self::Mysql(url) => Ok(Box::new(MysqlLocks::connect(url)?)),
            Self::Sqlite(path) => Ok(Box::new(SqliteLocks::open(path)?)),
        }
    }
}

pub fn run(args: LockFormArgs, config: &Config) -> Result<()> {
    let mut store = open_store(args.locking_db.as_deref(), config)?;
    let key = resolve_event(store.as_mut(), &args.project, &args.arm, &args.event)?;
    debug!(
        project_id = key.project_id,
        arm_id = key.arm_id,
        event_id = key.event_id,
        form = %args.form,
        "resolved event"
    );

    if args.lock {
        let Some(username) = args.username.as_deref() else {
            bail!("--username is required to lock a form");
        };
        let records = lock_form(store.as_mut(), key, &args.form, username)?;
        let rows: Vec<Vec<&str>> = records.iter().map(|record| vec![record.as_str()]).collect();
        write_csv_file(&args.outfile, &["record"], &rows)?;
        info!(
            form = %args.form,
            event = %args.event,
            locked = records.len(),
            outfile = %args.outfile.display(),
            "locked form"
        );
    } else {
        let removed = unlock_form(store.as_mut(), key, &args.form)?;
        info!(form = %args.form, event = %args.event, removed, "unlocked form");
    }
    Ok(())
}

pub fn run_report(args: LockReportArgs, config: &Config) -> Result<()> {
    let mut store = open_store(args.locking_db.as_deref(), config)?;
    let key = resolve_event(store.as_mut(), &args.project, &args.arm, &args.event)?;

    let row = report_locked_forms(
        store.as_mut(),
        key,
        &args.site_id,
        &args.xnat_id,
        &args.arm,
        &args.event,
        &args.forms,
    )?;

    let mut header = vec!["subject", "arm", "visit"];
    header.extend(args.forms.iter().map(String::as_str));
    write_csv(&mut io::stdout().lock(), &header, &[row]).context("failed to write lock report")
}

fn open_store(flag: Option<&str>, config: &Config) -> Result<Box<dyn LockStore>> {
    let location = config::require(
        flag,
        config.redcap.locking_db.as_deref(),
        "redcap.locking_db",
    )?;
    let backend = LockBackend::parse(&location);
    match &backend {
        LockBackend::Mysql(_) => debug!("opening REDCap MySQL database"),
        LockBackend::Sqlite(path) => debug!(path = %path.display(), "opening SQLite locking tables"),
    }
    backend.open()
}

/// An id that must match exactly one row.
fn single(what: &str, ids: Vec<i64>) -> Result<i64> {
    match ids.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no {what} found"),
        _ => bail!("{what} is ambiguous: {} matches", ids.len()),
    }
}

pub fn resolve_event(
    store: &mut dyn LockStore,
    project_name: &str,
    arm_name: &str,
    event_descrip: &str,
) -> Result<EventKey> {
    let project_id = single(
        &format!("project '{project_name}'"),
        store.project_ids(project_name)?,
    )?;
    let arm_id = single(
        &format!("arm '{arm_name}' in project {project_id}"),
        store.arm_ids(project_id, arm_name)?,
    )?;
    let event_id = single(
        &format!("event '{event_descrip}' in arm {arm_id}"),
        store.event_ids(arm_id, event_descrip)?,
    )?;
    Ok(EventKey {
        project_id,
        arm_id,
        event_id,
    })
}

/// Replaces any existing locks on `form_name` with one lock per record of the
/// event.
pub fn lock_form(
    store: &mut dyn LockStore,
    key: EventKey,
    form_name: &str,
    username: &str,
) -> Result<Vec<String>> {
    let records = store.event_records(key)?;
    let timestamp = local_timestamp_string();
    let cleared = store
        .replace_locks(key, form_name, &records, username, &timestamp)
        .context("failed to lock form")?;

    debug!(cleared, locked = records.len(), "replaced form locks");
    Ok(records)
}

pub fn unlock_form(store: &mut dyn LockStore, key: EventKey, form_name: &str) -> Result<usize> {
    store
        .clear_locks(key, form_name)
        .context("failed to unlock form")
}

/// One report row: `subject, arm, visit` followed by the lock timestamp of
/// each form (empty when unlocked). Locks are keyed by the site id; the row
/// is labelled with the XNAT subject id.
pub fn report_locked_forms(
    store: &mut dyn LockStore,
    key: EventKey,
    site_id: &str,
    xnat_id: &str,
    arm_name: &str,
    event_descrip: &str,
    forms: &[String],
) -> Result<Vec<String>> {
    let mut row = vec![
        xnat_id.to_string(),
        arm_name.to_lowercase(),
        event_descrip.to_lowercase(),
    ];
    for form in forms {
        row.push(store.lock_timestamp(key, site_id, form)?.unwrap_or_default());
    }
    Ok(row)
}
