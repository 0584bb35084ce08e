//! Top-level error type for the database layer

use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::ConnectionError;
use crate::driver::DriverError;
use crate::migration::MigrationError;

/// Errors surfaced by [`crate::Database`]
///
/// - [`Error::Config`] - fix the configuration, nothing was attempted
/// - [`Error::Migration`] - the migration pass failed; see the inner error
/// - [`Error::Connection`] - the service connection could not be opened or
///   closed
/// - [`Error::Query`] - a statement on the service connection failed
/// - [`Error::NotReady`] - the database has not been initialized (or
///   initialization failed)
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The migration pass failed
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Opening or closing the service connection failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A statement on the service connection failed
    #[error("query failed: {0}")]
    Query(DriverError),

    /// No service connection is available
    #[error("database is not ready")]
    NotReady,
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NotConnected => Self::NotReady,
            other => Self::Query(other),
        }
    }
}

impl Error {
    /// Returns true for configuration errors
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true for migration failures
    pub fn is_migration(&self) -> bool {
        matches!(self, Self::Migration(_))
    }
}

/// Result alias for database operations
pub type Result<T> = std::result::Result<T, Error>;
