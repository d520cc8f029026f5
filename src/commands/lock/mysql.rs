use anyhow::{Context, Result};
use sqlx::mysql::{MySql, MySqlConnection};
use sqlx::Connection;
use tokio::runtime::{Builder, Runtime};

use super::{EventKey, LockStore};

// Ids are cast so unsigned and narrower integer columns decode as i64.
const PROJECT_IDS: &str =
    "SELECT CAST(project_id AS SIGNED) FROM redcap_projects WHERE project_name = ?";
const ARM_IDS: &str = "SELECT CAST(arm_id AS SIGNED) FROM redcap_events_arms
     WHERE arm_name = ? AND project_id = ?";
const EVENT_IDS: &str = "SELECT CAST(event_id AS SIGNED) FROM redcap_events_metadata
     WHERE descrip = ? AND arm_id = ?";
const EVENT_RECORDS: &str = "SELECT DISTINCT record FROM redcap_data
     WHERE project_id = ? AND event_id = ?
     ORDER BY record";
const DELETE_LOCKS: &str = "DELETE FROM redcap_locking_data
     WHERE project_id = ? AND event_id = ? AND form_name = ?";
const INSERT_LOCK: &str = "INSERT INTO redcap_locking_data
       (project_id, record, event_id, form_name, username, timestamp)
     VALUES (?, ?, ?, ?, ?, ?)";
const LOCK_TIMESTAMP: &str = "SELECT CAST(timestamp AS CHAR) FROM redcap_locking_data
     WHERE project_id = ? AND event_id = ? AND record = ? AND form_name = ?
     ORDER BY ld_id DESC LIMIT 1";

/// Locking tables in the REDCap MySQL database.
pub struct MysqlLocks {
    runtime: Runtime,
    connection: MySqlConnection,
}

impl MysqlLocks {
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start database runtime")?;
        let connection = runtime
            .block_on(MySqlConnection::connect(url))
            .context("failed to connect to the REDCap database")?;
        Ok(Self {
            runtime,
            connection,
        })
    }

    fn ids(&mut self, sql: &'static str, name: &str, parent: Option<i64>) -> Result<Vec<i64>> {
        let mut query = sqlx::query_as::<MySql, (i64,)>(sql).bind(name);
        if let Some(parent) = parent {
            query = query.bind(parent);
        }
        let rows = self.runtime.block_on(query.fetch_all(&mut self.connection))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

impl LockStore for MysqlLocks {
    fn project_ids(&mut self, project_name: &str) -> Result<Vec<i64>> {
        self.ids(PROJECT_IDS, project_name, None)
    }

    fn arm_ids(&mut self, project_id: i64, arm_name: &str) -> Result<Vec<i64>> {
        self.ids(ARM_IDS, arm_name, Some(project_id))
    }

    fn event_ids(&mut self, arm_id: i64, descrip: &str) -> Result<Vec<i64>> {
        self.ids(EVENT_IDS, descrip, Some(arm_id))
    }

    fn event_records(&mut self, key: EventKey) -> Result<Vec<String>> {
        let rows = self.runtime.block_on(
            sqlx::query_as::<MySql, (String,)>(EVENT_RECORDS)
                .bind(key.project_id)
                .bind(key.event_id)
                .fetch_all(&mut self.connection),
        )?;
        Ok(rows.into_iter().map(|(record,)| record).collect())
    }

    fn replace_locks(
        &mut self,
        key: EventKey,
        form_name: &str,
        records: &[String],
        username: &str,
        timestamp: &str,
    ) -> Result<usize> {
        let Self {
            runtime,
            connection,
        } = self;
        let cleared = runtime.block_on(async move {
            let mut tx = connection.begin().await?;
            let cleared = sqlx::query::<MySql>(DELETE_LOCKS)
                .bind(key.project_id)
                .bind(key.event_id)
                .bind(form_name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            for record in records {
                sqlx::query::<MySql>(INSERT_LOCK)
                    .bind(key.project_id)
                    .bind(record.as_str())
                    .bind(key.event_id)
                    .bind(form_name)
                    .bind(username)
                    .bind(timestamp)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(cleared)
        })?;
        Ok(cleared as usize)
    }

    fn clear_locks(&mut self, key: EventKey, form_name: &str) -> Result<usize> {
        let result = self.runtime.block_on(
            sqlx::query::<MySql>(DELETE_LOCKS)
                .bind(key.project_id)
                .bind(key.event_id)
                .bind(form_name)
                .execute(&mut self.connection),
        )?;
        Ok(result.rows_affected() as usize)
    }

    fn lock_timestamp(
        &mut self,
        key: EventKey,
        record: &str,
        form_name: &str,
    ) -> Result<Option<String>> {
        let row = self.runtime.block_on(
            sqlx::query_as::<MySql, (Option<String>,)>(LOCK_TIMESTAMP)
                .bind(key.project_id)
                .bind(key.event_id)
                .bind(record)
                .bind(form_name)
                .fetch_optional(&mut self.connection),
        )?;
        Ok(row.and_then(|(timestamp,)| timestamp))
    }
}
