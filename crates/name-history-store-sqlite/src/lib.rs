use std::path::Path;

use anyhow::{bail, Context, Result};
use name_history_core::{sort_history, HistoryStore, Identifier, Record, StoreError};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS `names` (
  "index" INTEGER NOT NULL UNIQUE,
  "uuid" BLOB NOT NULL,
  "name" TEXT NOT NULL,
  "changedToAt" INTEGER,
  "source" INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY("index" AUTOINCREMENT)
);

CREATE INDEX IF NOT EXISTS `names_index_uuid` ON `names`("uuid");
"#;

const QUERY_NAME_HISTORY_SQL: &str = r#"
SELECT "name", "changedToAt", "source"
FROM `names`
WHERE "uuid" = ?1
ORDER BY "changedToAt", "index"
"#;

const LIST_IDENTIFIERS_SQL: &str = r#"
SELECT DISTINCT "uuid"
FROM `names`
ORDER BY "uuid"
"#;

const INSERT_NAME_SQL: &str = r#"
INSERT INTO `names` ("uuid", "name", "changedToAt", "source")
VALUES (?1, ?2, ?3, COALESCE(?4, 0))
"#;

/// `SQLite` name-history store.
///
/// Writes accumulate in one open transaction until [`SqliteHistoryStore::commit`].
pub struct SqliteHistoryStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub identifiers: u64,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
}

impl SqliteHistoryStore {
    /// Open (creating if needed) a name-history database and ensure its schema exists.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, configured, or initialized.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        tracing::debug!(path = %path.display(), "opened name history database");
        Self::with_schema(conn)
    }

    /// Open a name-history database that must already exist.
    ///
    /// # Errors
    /// Returns an error when no file exists at `path` or [`SqliteHistoryStore::open`] fails.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("no name history database at {}", path.display());
        }
        Self::open(path)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_SCHEMA_SQL).context("failed to create names schema")?;
        Ok(Self { conn })
    }

    /// Stored history of `identifier`, ascending by change time with unknown times sorted as 0.
    ///
    /// # Errors
    /// Returns an error when the query fails or a row cannot be decoded.
    pub fn name_history(&self, identifier: &Identifier) -> Result<Vec<Record>> {
        let key = identifier.to_binary_key();
        let mut stmt = self
            .conn
            .prepare_cached(QUERY_NAME_HISTORY_SQL)
            .context("failed to prepare name history query")?;
        let rows = stmt.query_map(params![key.as_slice()], |row| {
            Ok(Record::from_store_row(row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

        let mut history = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read name history for {identifier}"))?;
        sort_history(&mut history);
        Ok(history)
    }

    /// Every identifier with at least one stored row, in binary key order.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored key is not 16 bytes wide.
    pub fn identifiers(&self) -> Result<Vec<Identifier>> {
        let mut stmt = self
            .conn
            .prepare_cached(LIST_IDENTIFIERS_SQL)
            .context("failed to prepare identifier listing")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list stored identifiers")?;

        keys.into_iter()
            .map(|key| -> Result<Identifier> {
                let key: [u8; 16] = key.as_slice().try_into().with_context(|| {
                    format!("stored identifier key has {} bytes, expected 16", key.len())
                })?;
                Ok(Identifier::from_binary_key(key))
            })
            .collect()
    }

    /// Insert all `records` for `identifier` inside the open transaction.
    ///
    /// A failed row rolls back the whole open transaction.
    ///
    /// # Errors
    /// Returns an error when the transaction cannot be started or any row fails to insert.
    pub fn insert_history(&mut self, identifier: &Identifier, records: &[Record]) -> Result<usize> {
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN IMMEDIATE")
                .context("failed to start name history transaction")?;
        }

        let key = identifier.to_binary_key();
        match self.insert_rows(&key, records) {
            Ok(count) => Ok(count),
            Err(err) => {
                tracing::warn!(%identifier, error = %err, "rolling back name history insert");
                if !self.conn.is_autocommit() {
                    self.conn
                        .execute_batch("ROLLBACK")
                        .context("failed to roll back name history transaction")?;
                }
                Err(err.context(format!("failed to insert name history for {identifier}")))
            }
        }
    }

    fn insert_rows(&self, key: &[u8; 16], records: &[Record]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(INSERT_NAME_SQL)?;
        for record in records {
            stmt.execute(params![
                key.as_slice(),
                record.name,
                record.changed_to_at,
                record.source
            ])?;
        }
        Ok(records.len())
    }

    /// Commit the open transaction, if any.
    ///
    /// A rejected commit rolls back the open transaction.
    ///
    /// # Errors
    /// Returns an error when `SQLite` rejects the commit.
    pub fn commit(&mut self) -> Result<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        if let Err(err) = self.conn.execute_batch("COMMIT") {
            tracing::warn!(error = %err, "rolling back rejected name history commit");
            if !self.conn.is_autocommit() {
                self.conn
                    .execute_batch("ROLLBACK")
                    .context("failed to roll back name history transaction")?;
            }
            return Err(anyhow::Error::new(err).context("failed to commit name history"));
        }
        Ok(())
    }

    /// Number of stored rows for `identifier`.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn history_len(&self, identifier: &Identifier) -> Result<u64> {
        let key = identifier.to_binary_key();
        let count = self
            .conn
            .query_row(r#"SELECT COUNT(*) FROM `names` WHERE "uuid" = ?1"#, params![key.as_slice()], |row| {
                row.get::<_, u64>(0)
            })
            .with_context(|| format!("failed to count name history for {identifier}"))?;
        Ok(count)
    }

    /// Distinct identifiers and total rows in the store.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        self.conn
            .query_row(r#"SELECT COUNT(DISTINCT "uuid"), COUNT(*) FROM `names`"#, [], |row| {
                Ok(StoreStats { identifiers: row.get(0)?, rows: row.get(1)? })
            })
            .context("failed to read store statistics")
    }

    /// Run `PRAGMA quick_check`.
    ///
    /// # Errors
    /// Returns an error when the probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        Ok(IntegrityReport { quick_check_ok: quick_check_message == "ok", quick_check_message })
    }

    /// Commit pending work and close the connection.
    ///
    /// # Errors
    /// Returns an error when the final commit or close fails.
    pub fn close(mut self) -> Result<()> {
        self.commit()?;
        self.conn.close().map_err(|(_, err)| err).context("failed to close sqlite database")
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn name_history(&self, identifier: &Identifier) -> Result<Vec<Record>, StoreError> {
        SqliteHistoryStore::name_history(self, identifier).map_err(Into::into)
    }

    fn insert_history(
        &mut self,
        identifier: &Identifier,
        records: &[Record],
    ) -> Result<usize, StoreError> {
        SqliteHistoryStore::insert_history(self, identifier, records).map_err(Into::into)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        SqliteHistoryStore::commit(self).map_err(Into::into)
    }
}
