use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::{EventKey, LockStore};

/// Locking tables in a SQLite database.
pub struct SqliteLocks {
    pub(super) connection: Connection,
}

impl SqliteLocks {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open locking database {}", path.display()))?;
        Ok(Self::new(connection))
    }

    fn ids(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<i64>> {
        let mut statement = self.connection.prepare(sql)?;
        let ids = statement
            .query_map(params, |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}

fn delete_locks(connection: &Connection, key: EventKey, form_name: &str) -> Result<usize> {
    let removed = connection.execute(
        "DELETE FROM redcap_locking_data
         WHERE project_id = ?1 AND event_id = ?2 AND form_name = ?3",
        params![key.project_id, key.event_id, form_name],
    )?;
    Ok(removed)
}

impl LockStore for SqliteLocks {
    fn project_ids(&mut self, project_name: &str) -> Result<Vec<i64>> {
        self.ids(
            "SELECT project_id FROM redcap_projects WHERE project_name = ?1",
            params![project_name],
        )
    }

    fn arm_ids(&mut self, project_id: i64, arm_name: &str) -> Result<Vec<i64>> {
        self.ids(
            "SELECT arm_id FROM redcap_events_arms WHERE arm_name = ?1 AND project_id = ?2",
            params![arm_name, project_id],
        )
    }

    fn event_ids(&mut self, arm_id: i64, descrip: &str) -> Result<Vec<i64>> {
        self.ids(
            "SELECT event_id FROM redcap_events_metadata WHERE descrip = ?1 AND arm_id = ?2",
            params![descrip, arm_id],
        )
    }

    fn event_records(&mut self, key: EventKey) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare(
            "SELECT DISTINCT record FROM redcap_data
             WHERE project_id = ?1 AND event_id = ?2
             ORDER BY record",
        )?;
        let records = statement
            .query_map(params![key.project_id, key.event_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(records)
    }

    fn replace_locks(
        &mut self,
        key: EventKey,
        form_name: &str,
        records: &[String],
        username: &str,
        timestamp: &str,
    ) -> Result<usize> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cleared = delete_locks(&tx, key, form_name)?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO redcap_locking_data
                   (project_id, record, event_id, form_name, username, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                insert.execute(params![
                    key.project_id,
                    record,
                    key.event_id,
                    form_name,
                    username,
                    timestamp
                ])?;
            }
        }
        tx.commit()?;
        Ok(cleared)
    }

    fn clear_locks(&mut self, key: EventKey, form_name: &str) -> Result<usize> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = delete_locks(&tx, key, form_name)?;
        tx.commit()?;
        Ok(removed)
    }

    fn lock_timestamp(
        &mut self,
        key: EventKey,
        record: &str,
        form_name: &str,
    ) -> Result<Option<String>> {
        let timestamp = self
            .connection
            .query_row(
                "SELECT timestamp FROM redcap_locking_data
                 WHERE project_id = ?1 AND event_id = ?2 AND record = ?3 AND form_name = ?4
                 ORDER BY ld_id DESC LIMIT 1",
                params![key.project_id, key.event_id, record, form_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(timestamp)
    }
}
