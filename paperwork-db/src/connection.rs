//! Connection management
//!
//! [`ConnectionManager`] opens and closes connections for a configured
//! driver. Every connection it opens gets a diagnostic sink that forwards
//! driver events into the `log` facade.

use crate::config::DatabaseConfig;
use crate::driver::{
    Connection, ConnectTarget, DatabaseDriver, DiagnosticSink, DriverDiagnostic, DriverError,
};
use log::{debug, error, log};
use std::sync::Arc;
use thiserror::Error;

/// Log target for forwarded driver diagnostics
pub const DRIVER_LOG_TARGET: &str = "paperwork_db::driver";

/// Errors opening or closing a connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The store is unreachable or the session could not be negotiated
    #[error("failed to connect to {contact_points:?}: {source}")]
    Connect {
        /// Contact points that were tried
        contact_points: Vec<String>,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// The connection could not be closed cleanly
    #[error("failed to close connection: {0}")]
    Disconnect(#[source] DriverError),
}

/// Opens and closes connections for one driver and configuration
#[derive(Clone)]
pub struct ConnectionManager {
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<DatabaseConfig>,
}

impl ConnectionManager {
    /// Creates a manager for the given driver and configuration
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: Arc<DatabaseConfig>) -> Self {
        Self { driver, config }
    }

    /// The configuration connections are opened with
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Opens a connection, optionally bound to `keyspace`
    ///
    /// Bootstrap connections pass `None` because the keyspace may not exist
    /// yet.
    pub async fn connect(
        &self,
        keyspace: Option<&str>,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let target = ConnectTarget {
            contact_points: self.config.connection.contact_points.clone(),
            keyspace: keyspace.map(str::to_string),
            connect_timeout: self.config.connect_timeout,
            request_timeout: self.config.request_timeout,
        };

        debug!(
            "Database: ({}) Connecting to {:?} (keyspace: {}) ...",
            self.driver.kind(),
            target.contact_points,
            keyspace.unwrap_or("<none>")
        );

        self.driver
            .connect(&target, log_sink())
            .await
            .map_err(|source| {
                error!(
                    "Database: ({}) Connection to {:?} failed: {source}",
                    self.driver.kind(),
                    target.contact_points
                );
                ConnectionError::Connect {
                    contact_points: target.contact_points.clone(),
                    source,
                }
            })
    }

    /// Closes a connection previously returned by [`ConnectionManager::connect`]
    pub async fn disconnect(&self, connection: Box<dyn Connection>) -> Result<(), ConnectionError> {
        debug!("Database: ({}) Disconnecting ...", self.driver.kind());
        connection
            .close()
            .await
            .map_err(ConnectionError::Disconnect)
    }
}

/// Sink that writes driver diagnostics to the log
fn log_sink() -> DiagnosticSink {
    Arc::new(|diagnostic: DriverDiagnostic| {
        log!(
            target: DRIVER_LOG_TARGET,
            diagnostic.level.log_level(),
            "Database: ({}) {}",
            diagnostic.source,
            diagnostic.message
        );
    })
}
