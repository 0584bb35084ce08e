//! Database drivers
//!
//! This module contains the [`DatabaseDriver`] and [`Connection`] traits and
//! the enumerated set of drivers a service can be configured with. The
//! configured [`DriverKind`] is resolved once at startup via [`resolve`];
//! nothing downstream dispatches on driver names.

#[cfg(feature = "cql")]
pub mod cql;

use crate::config::ConfigError;
use crate::query::{ResultSet, Statement};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "cql")]
pub use cql::CqlDriver;

/// Supported database drivers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Wide-column stores speaking CQL (Cassandra, ScyllaDB)
    #[default]
    Cql,
}

impl DriverKind {
    /// Configuration name of the driver, also used as the migrations
    /// subdirectory name
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::Cql => "cql",
        }
    }

    /// Cargo feature that provides the driver implementation
    pub fn feature(&self) -> &'static str {
        match self {
            DriverKind::Cql => "cql",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cql" => Ok(DriverKind::Cql),
            _ => Err(ConfigError::UnknownDriver(s.to_string())),
        }
    }
}

/// Resolves a configured driver kind into its implementation
///
/// Fails with [`ConfigError::DriverUnavailable`] when the crate was built
/// without the feature that provides the driver.
pub fn resolve(kind: DriverKind) -> Result<Arc<dyn DatabaseDriver>, ConfigError> {
    match kind {
        #[cfg(feature = "cql")]
        DriverKind::Cql => Ok(Arc::new(CqlDriver::new())),
        #[cfg(not(feature = "cql"))]
        DriverKind::Cql => Err(ConfigError::DriverUnavailable {
            driver: kind.name(),
            feature: kind.feature(),
        }),
    }
}

/// Errors reported by a driver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The store could not be reached or the session could not be negotiated
    #[error("connection error: {0}")]
    Connection(String),

    /// No usable connection is available
    #[error("not connected")]
    NotConnected,

    /// The statement did not complete within its request timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The store rejected the statement (syntax, unknown table, ...)
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The store failed while executing the statement
    #[error("server error: {0}")]
    Server(String),

    /// Results could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl DriverError {
    /// Returns true if retrying later might succeed
    ///
    /// Invalid queries and decode errors are permanent; everything else
    /// depends on the state of the cluster.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotConnected | Self::Timeout(_) | Self::Server(_)
        )
    }
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Bootstrap hosts, in configured order
    pub contact_points: Vec<String>,

    /// Keyspace to bind the session to; `None` for bootstrap connections
    pub keyspace: Option<String>,

    /// How long to wait for the session to be established
    pub connect_timeout: Duration,

    /// Default per-statement timeout
    pub request_timeout: Duration,
}

/// Severity of a driver diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Verbose driver internals
    Verbose,
    /// Informational
    Info,
    /// Something unexpected that the driver recovered from
    Warning,
    /// A failure inside the driver
    Error,
}

impl DiagnosticLevel {
    /// Parses a driver-reported level name; unknown names are treated as
    /// verbose
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warning" | "warn" => Self::Warning,
            "info" => Self::Info,
            _ => Self::Verbose,
        }
    }

    /// Matching `log` level
    pub fn log_level(&self) -> log::Level {
        match self {
            Self::Verbose => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// A diagnostic event emitted by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDiagnostic {
    /// Severity
    pub level: DiagnosticLevel,
    /// Driver component that produced the event
    pub source: String,
    /// Human-readable message
    pub message: String,
}

impl DriverDiagnostic {
    /// Creates a diagnostic
    pub fn new(
        level: DiagnosticLevel,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Receives driver diagnostics for the lifetime of a connection
pub type DiagnosticSink = Arc<dyn Fn(DriverDiagnostic) + Send + Sync>;

/// An open connection to the store
///
/// Connections are owned exclusively by whoever opened them; callers never
/// issue statements on the same connection concurrently during a migration
/// run.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Executes a single statement
    ///
    /// Returns an empty [`ResultSet`] for statements that produce no rows.
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError>;

    /// Releases the connection
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// A database driver capable of opening connections
///
/// Implementations exist for each [`DriverKind`]; tests use the in-memory
/// driver from `test_utils`.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Which driver this is
    fn kind(&self) -> DriverKind;

    /// Opens a connection to the store
    ///
    /// Diagnostics produced while the connection is alive are delivered to
    /// `sink`.
    async fn connect(
        &self,
        target: &ConnectTarget,
        sink: DiagnosticSink,
    ) -> Result<Box<dyn Connection>, DriverError>;
}
