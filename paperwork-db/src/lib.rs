//! # Paperwork DB
//!
//! The database layer shared by Paperwork services: configuration, driver
//! selection, connection handling and a forward-only keyspace migration
//! engine for CQL stores (Cassandra, ScyllaDB).
//!
//! On startup a service builds a [`Database`], calls
//! [`Database::initialize`] and only starts serving once the readiness
//! signal reports [`Readiness::Ready`]:
//!
//! ```no_run
//! use paperwork_db::{Database, Readiness};
//!
//! # async fn example() -> paperwork_db::Result<()> {
//! let db = Database::from_env()?;
//! let report = db.initialize().await?;
//! println!("{} migrations applied", report.applied.len());
//!
//! assert_eq!(db.wait_ready().await, Readiness::Ready);
//! # Ok(())
//! # }
//! ```
//!
//! ## Migrations
//!
//! Scripts live in `<migrations_root>/up/` and are applied in lexical
//! filename order, one statement per file. Applied scripts are recorded in
//! `<keyspace>.migrations`. See the [`migration`] module.
//!
//! ## Configuration
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `DATABASE_DRIVER` | Driver name, `cql` by default |
//! | `DATABASE_CQL_CONTACT_POINTS` | JSON array of contact points |
//! | `DATABASE_CQL_KEYSPACE` | Keyspace name |
//! | `SERVICE_DIRNAME` | Service directory; migrations live in `../migrations/<driver>` |
//! | `DATABASE_MIGRATIONS_DIR` | Explicit migrations root |
//! | `DATABASE_CONNECT_TIMEOUT_MS` | Session setup timeout |
//! | `DATABASE_REQUEST_TIMEOUT_MS` | Default statement timeout |
//!
//! ## Feature Flags
//!
//! - `cql` - CQL driver backed by the `scylla` crate
//! - `test-utils` - in-memory driver for tests

pub mod config;
pub mod connection;
pub mod database;
pub mod driver;
pub mod error;
pub mod events;
pub mod executor;
pub mod migration;
pub mod query;
pub mod users;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConfigError, ConnectionConfig, DatabaseConfig, DatabaseConfigBuilder};
pub use connection::{ConnectionError, ConnectionManager};
pub use database::{Database, Readiness};
pub use driver::{Connection, DatabaseDriver, DriverError, DriverKind};
pub use error::{Error, Result};
pub use events::{MigrationEvent, MigrationHook, RunState};
pub use executor::{QueryExecutor, QueryOutcome};
pub use migration::{
    MigrationError, MigrationPlan, MigrationRecord, MigrationReport, MigrationRunner,
};
pub use query::{ResultSet, Row, Statement, Value};

#[cfg(feature = "cql")]
pub use driver::CqlDriver;
