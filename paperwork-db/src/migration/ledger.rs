//! The migration ledger
//!
//! Applied migrations are recorded in `<keyspace>.migrations`:
//!
//! ```text
//! CREATE TABLE IF NOT EXISTS <keyspace>.migrations (
//!     filename text PRIMARY KEY,
//!     migrated_at timestamp
//! );
//! ```
//!
//! Reading never changes the schema. The table is created lazily, right
//! before the first record is written; on a fresh install the keyspace itself
//! does not exist until the first migration creates it.

use super::{MigrationError, MigrationRecord};
use crate::driver::DriverError;
use crate::executor::{QueryExecutor, QueryOutcome};
use crate::query::Statement;
use chrono::{DateTime, Utc};
use log::{debug, info};

/// The name of the ledger table
pub const MIGRATIONS_TABLE: &str = "migrations";

/// What [`Ledger::ensure_table`] found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// The keyspace does not exist yet; nothing was created
    FreshInstall,
    /// The ledger table exists (possibly just created)
    Ready,
}

/// Reads and appends ledger records over one connection
pub struct Ledger<'c> {
    executor: QueryExecutor<'c>,
    keyspace: &'c str,
    table_ready: bool,
}

impl<'c> Ledger<'c> {
    /// Creates a ledger for `keyspace`
    ///
    /// `keyspace` must be a validated identifier; it is interpolated into
    /// statements.
    pub fn new(executor: QueryExecutor<'c>, keyspace: &'c str) -> Self {
        Self {
            executor,
            keyspace,
            table_ready: false,
        }
    }

    /// Fully qualified ledger table name
    pub fn table(&self) -> String {
        format!("{}.{MIGRATIONS_TABLE}", self.keyspace)
    }

    /// Creates the ledger table if the keyspace exists and the table does not
    pub async fn ensure_table(&mut self) -> Result<LedgerState, DriverError> {
        if self.table_ready {
            return Ok(LedgerState::Ready);
        }

        if !self.keyspace_exists().await? {
            debug!(
                "Database: keyspace '{}' does not exist yet, treating as fresh install",
                self.keyspace
            );
            return Ok(LedgerState::FreshInstall);
        }

        if !self.table_exists().await? {
            info!("Database: creating migration ledger {}", self.table());
            let create = Statement::new(format!(
                "CREATE TABLE IF NOT EXISTS {} (filename text PRIMARY KEY, migrated_at timestamp)",
                self.table()
            ))
            .idempotent();
            if let QueryOutcome::Failed(err) = self.executor.execute(&create).await {
                return Err(err);
            }
        }

        self.table_ready = true;
        Ok(LedgerState::Ready)
    }

    /// Reads every recorded migration
    ///
    /// Read-only: an absent keyspace or table reads as an empty ledger and
    /// nothing is created. A failing query is an error, never an empty
    /// ledger.
    pub async fn read_applied(&mut self) -> Result<Vec<MigrationRecord>, MigrationError> {
        if !self.table_ready {
            let present = self.keyspace_exists().await.map_err(MigrationError::LedgerRead)?
                && self.table_exists().await.map_err(MigrationError::LedgerRead)?;
            if !present {
                debug!("Database: no ledger in '{}' yet", self.keyspace);
                return Ok(Vec::new());
            }
            self.table_ready = true;
        }

        let select = Statement::new(format!(
            "SELECT filename, migrated_at FROM {}",
            self.table()
        ))
        .idempotent();

        let rows = match self.executor.execute(&select).await {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Empty => return Ok(Vec::new()),
            QueryOutcome::Failed(err) => return Err(MigrationError::LedgerRead(err)),
        };

        rows.rows()
            .map(|row| {
                let filename = row.text("filename").ok_or_else(|| {
                    MigrationError::LedgerRead(DriverError::Decode(
                        "ledger row without a filename".to_string(),
                    ))
                })?;
                Ok(MigrationRecord {
                    filename: filename.to_string(),
                    applied_at: row
                        .timestamp("migrated_at")
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                })
            })
            .collect()
    }

    /// Records `filename` as applied now
    ///
    /// Creates the ledger table first if this run has not done so yet, which
    /// is the case when the keyspace was created by the migration that just
    /// ran.
    pub async fn record(&mut self, filename: &str) -> Result<MigrationRecord, MigrationError> {
        let write_err = |source| MigrationError::LedgerWrite {
            filename: filename.to_string(),
            source,
        };

        match self.ensure_table().await.map_err(write_err)? {
            LedgerState::Ready => {}
            LedgerState::FreshInstall => {
                return Err(write_err(DriverError::InvalidQuery(format!(
                    "keyspace '{}' does not exist",
                    self.keyspace
                ))))
            }
        }

        let applied_at = Utc::now();
        let insert = Statement::new(format!(
            "INSERT INTO {} (filename, migrated_at) VALUES (?, ?)",
            self.table()
        ))
        .bind(filename)
        .bind(applied_at)
        .idempotent();

        match self.executor.execute(&insert).await {
            QueryOutcome::Failed(err) => Err(write_err(err)),
            QueryOutcome::Rows(_) | QueryOutcome::Empty => Ok(MigrationRecord {
                filename: filename.to_string(),
                applied_at,
            }),
        }
    }

    async fn keyspace_exists(&self) -> Result<bool, DriverError> {
        let query = Statement::new(
            "SELECT keyspace_name FROM system_schema.keyspaces WHERE keyspace_name = ?",
        )
        .bind(self.keyspace)
        .idempotent();
        self.exists(&query).await
    }

    async fn table_exists(&self) -> Result<bool, DriverError> {
        let query = Statement::new(
            "SELECT table_name FROM system_schema.tables WHERE keyspace_name = ? AND table_name = ?",
        )
        .bind(self.keyspace)
        .bind(MIGRATIONS_TABLE)
        .idempotent();
        self.exists(&query).await
    }

    async fn exists(&self, query: &Statement) -> Result<bool, DriverError> {
        match self.executor.execute(query).await {
            QueryOutcome::Rows(_) => Ok(true),
            QueryOutcome::Empty => Ok(false),
            QueryOutcome::Failed(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Connection, ConnectTarget, DatabaseDriver, DriverDiagnostic};
    use crate::test_utils::MemoryDriver;
    use std::sync::Arc;
    use std::time::Duration;

    async fn open(driver: &MemoryDriver) -> Box<dyn Connection> {
        let target = ConnectTarget {
            contact_points: vec!["localhost".into()],
            keyspace: None,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        };
        driver
            .connect(&target, Arc::new(|_: DriverDiagnostic| {}))
            .await
            .ok()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_install_reads_empty() {
        let driver = MemoryDriver::new();
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        assert_eq!(ledger.ensure_table().await.unwrap(), LedgerState::FreshInstall);
        assert!(ledger.read_applied().await.unwrap().is_empty());
        assert!(!driver.has_table("app", MIGRATIONS_TABLE));
    }

    #[tokio::test]
    async fn test_ensure_table_creates_table() {
        let driver = MemoryDriver::new().with_keyspace("app");
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        assert_eq!(ledger.ensure_table().await.unwrap(), LedgerState::Ready);
        assert!(driver.has_table("app", MIGRATIONS_TABLE));

        // Second call does not touch the store
        let before = driver.executed().len();
        assert_eq!(ledger.ensure_table().await.unwrap(), LedgerState::Ready);
        assert_eq!(driver.executed().len(), before);
    }

    #[tokio::test]
    async fn test_ensure_table_existing_table() {
        let driver = MemoryDriver::new().with_applied("app", ["001_a"]);
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        assert_eq!(ledger.ensure_table().await.unwrap(), LedgerState::Ready);
        assert!(driver
            .executed()
            .iter()
            .all(|cql| !cql.starts_with("CREATE TABLE")));
    }

    #[tokio::test]
    async fn test_read_applied_creates_nothing() {
        let driver = MemoryDriver::new().with_keyspace("app");
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        assert!(ledger.read_applied().await.unwrap().is_empty());
        assert!(!driver.has_table("app", MIGRATIONS_TABLE));
        assert!(driver
            .executed()
            .iter()
            .all(|cql| !cql.starts_with("CREATE")));
    }

    #[tokio::test]
    async fn test_read_applied() {
        let driver = MemoryDriver::new().with_applied("app", ["002_b", "001_a"]);
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        let mut filenames: Vec<_> = ledger
            .read_applied()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.filename)
            .collect();
        filenames.sort();
        assert_eq!(filenames, vec!["001_a", "002_b"]);
    }

    #[tokio::test]
    async fn test_read_applied_failure_is_not_empty() {
        let driver = MemoryDriver::new()
            .with_applied("app", ["001_a"])
            .fail_ledger_reads();
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        let err = ledger.read_applied().await.unwrap_err();
        assert!(matches!(err, MigrationError::LedgerRead(_)));
    }

    #[tokio::test]
    async fn test_record() {
        let driver = MemoryDriver::new().with_keyspace("app");
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        let before = Utc::now();
        let record = ledger.record("001_a").await.unwrap();
        assert_eq!(record.filename, "001_a");
        assert!(record.applied_at >= before);
        assert_eq!(driver.applied("app"), vec!["001_a"]);
    }

    #[tokio::test]
    async fn test_record_creates_table_after_keyspace_appears() {
        let driver = MemoryDriver::new();
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        assert!(ledger.read_applied().await.unwrap().is_empty());

        // First migration creates the keyspace
        conn.execute(&Statement::new(
            "CREATE KEYSPACE app WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1}",
        ))
        .await
        .unwrap();

        ledger.record("001_create_keyspace").await.unwrap();
        assert!(driver.has_table("app", MIGRATIONS_TABLE));
        assert_eq!(driver.applied("app"), vec!["001_create_keyspace"]);
    }

    #[tokio::test]
    async fn test_record_without_keyspace() {
        let driver = MemoryDriver::new();
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        let err = ledger.record("001_a").await.unwrap_err();
        assert!(matches!(err, MigrationError::LedgerWrite { ref filename, .. } if filename == "001_a"));
    }

    #[tokio::test]
    async fn test_record_write_failure() {
        let driver = MemoryDriver::new()
            .with_keyspace("app")
            .fail_ledger_writes();
        let conn = open(&driver).await;
        let mut ledger = Ledger::new(QueryExecutor::new(&*conn), "app");

        let err = ledger.record("001_a").await.unwrap_err();
        assert!(matches!(err, MigrationError::LedgerWrite { .. }));
        assert!(driver.applied("app").is_empty());
    }
}
