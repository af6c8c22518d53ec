//! `SQLite`-backed implementation of [`DestinationStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Load workers share
//! the connection, so their inserts are serialized at the lock.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::backend::{DestinationStore, LoadRecord, ReplaceTable, Row};
use crate::error::{self, StoreError};
use crate::schema::{qualified_table, quote_identifier, staging_table, ColumnDef};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for destination metadata tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS _loads (
    load_id TEXT NOT NULL,
    pipeline TEXT NOT NULL,
    dataset TEXT NOT NULL,
    status TEXT NOT NULL,
    row_count INTEGER NOT NULL DEFAULT 0,
    inserted_at TEXT NOT NULL,
    PRIMARY KEY (dataset, load_id)
);
";

/// `SQLite` destination database.
///
/// Create with [`SqliteDestination::open`] for a file-backed store or
/// [`SqliteDestination::in_memory`] for tests.
pub struct SqliteDestination {
    conn: Mutex<Connection>,
    location: Option<PathBuf>,
}

impl SqliteDestination {
    /// Open or create a destination database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created,
    /// or [`StoreError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory destination (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the database can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: None,
        })
    }

    /// Completed loads for `dataset`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] on query failure.
    #[allow(clippy::cast_sign_loss)]
    pub fn load_history(&self, dataset: &str) -> error::Result<Vec<LoadRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT load_id, pipeline, dataset, row_count FROM _loads \
             WHERE dataset = ?1 ORDER BY inserted_at, rowid",
        )?;
        let rows = stmt.query_map([dataset], |row| {
            let row_count: i64 = row.get(3)?;
            Ok(LoadRecord {
                load_id: row.get(0)?,
                pipeline: row.get(1)?,
                dataset: row.get(2)?,
                row_count: row_count.max(0) as u64,
            })
        })?;
        let mut out = Vec::new();
        for record in rows {
            out.push(record?);
        }
        Ok(out)
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }
}

fn table_exists(conn: &Connection, name: &str) -> error::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Convert a JSON value into the `SQLite` value stored for it.
fn to_sql_value(value: Option<&Value>) -> error::Result<SqlValue> {
    Ok(match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => SqlValue::Text(n.to_string()),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(nested @ (Value::Array(_) | Value::Object(_))) => {
            SqlValue::Text(serde_json::to_string(nested)?)
        }
    })
}

impl DestinationStore for SqliteDestination {
    fn describe(&self) -> String {
        match &self.location {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }

    fn prepare_staging(
        &self,
        dataset: &str,
        table: &str,
        columns: &[ColumnDef],
    ) -> error::Result<()> {
        let staging = quote_identifier(&staging_table(dataset, table));
        let conn = self.lock_conn()?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {staging}"))?;
        if columns.is_empty() {
            return Ok(());
        }

        let column_sql = columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.data_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!("CREATE TABLE {staging} ({column_sql})"))?;
        tracing::debug!(table = %staging, columns = columns.len(), "prepared staging table");
        Ok(())
    }

    fn insert_rows(
        &self,
        dataset: &str,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> error::Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let staging = staging_table(dataset, table);
        let conn = self.lock_conn()?;
        if !table_exists(&conn, &staging)? {
            return Err(StoreError::MissingStaging(staging));
        }

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
            quote_identifier(&staging)
        );

        let tx = conn.unchecked_transaction()?;
        let mut count = 0u64;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let values = columns
                    .iter()
                    .map(|c| to_sql_value(row.get(&c.name)))
                    .collect::<error::Result<Vec<_>>>()?;
                stmt.execute(rusqlite::params_from_iter(values))?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn commit_replace(&self, load: &LoadRecord, tables: &[ReplaceTable]) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        for table in tables {
            let target = qualified_table(&load.dataset, &table.name);
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                quote_identifier(&target)
            ))?;
            if table.staged {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_identifier(&staging_table(&load.dataset, &table.name)),
                    quote_identifier(&target)
                ))?;
            }
        }

        tx.execute(
            "INSERT INTO _loads (load_id, pipeline, dataset, status, row_count, inserted_at) \
             VALUES (?1, ?2, ?3, 'completed', ?4, ?5)",
            rusqlite::params![
                load.load_id,
                load.pipeline,
                load.dataset,
                load.row_count as i64,
                Self::now_sqlite(),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            dataset = load.dataset,
            load_id = load.load_id,
            tables = tables.len(),
            "replace load committed"
        );
        Ok(())
    }

    fn discard_staging(&self, dataset: &str, tables: &[String]) -> error::Result<()> {
        let conn = self.lock_conn()?;
        for table in tables {
            conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                quote_identifier(&staging_table(dataset, table))
            ))?;
        }
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn table_row_count(&self, dataset: &str, table: &str) -> error::Result<Option<u64>> {
        let name = qualified_table(dataset, table);
        let conn = self.lock_conn()?;
        if !table_exists(&conn, &name)? {
            return Ok(None);
        }
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_identifier(&name)),
            [],
            |row| row.get(0),
        )?;
        Ok(Some(count.max(0) as u64))
    }

    fn list_tables(&self) -> error::Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for name in names {
            out.push(name?);
        }
        Ok(out)
    }
}
