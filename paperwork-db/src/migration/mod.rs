//! Keyspace migrations
//!
//! Forward-only CQL scripts are discovered in `<migrations_root>/up/` and
//! applied in lexical filename order. Every script that executes
//! successfully is recorded in the `<keyspace>.migrations` ledger table.
//!
//! The ledger must always be a prefix of the sorted available scripts. A run
//! that finds otherwise stops before executing anything; see
//! [`MigrationError::Integrity`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use paperwork_db::config::DatabaseConfig;
//! use paperwork_db::driver;
//! use paperwork_db::migration::MigrationRunner;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(DatabaseConfig::from_env()?);
//! let driver = driver::resolve(config.driver)?;
//!
//! let report = MigrationRunner::new(config, driver).run().await?;
//! println!("applied {} migrations", report.applied.len());
//! # Ok(())
//! # }
//! ```

mod discovery;
mod error;
mod ledger;
mod runner;
mod types;

pub use discovery::{MigrationSource, UP_DIR};
pub use error::MigrationError;
pub use ledger::{Ledger, LedgerState, MIGRATIONS_TABLE};
pub use runner::MigrationRunner;
pub use types::{MigrationFile, MigrationPlan, MigrationRecord, MigrationReport};
