//! Database configuration
//!
//! Configuration is read once at startup, either from the service
//! environment ([`DatabaseConfig::from_env`]), from a TOML document
//! ([`DatabaseConfig::load`]) or assembled with [`DatabaseConfig::builder`].
//! Every path ends in [`DatabaseConfig::validate`]: missing or empty contact
//! points or keyspace are fatal and reported before any connection attempt.

use crate::driver::DriverKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Selects the database driver (defaults to `cql`)
pub const ENV_DRIVER: &str = "DATABASE_DRIVER";
/// JSON array of contact points, e.g. `["10.0.0.1:9042","10.0.0.2:9042"]`
pub const ENV_CQL_CONTACT_POINTS: &str = "DATABASE_CQL_CONTACT_POINTS";
/// Keyspace the service works in
pub const ENV_CQL_KEYSPACE: &str = "DATABASE_CQL_KEYSPACE";
/// Directory of the running service; migrations live in `../migrations/<driver>`
pub const ENV_SERVICE_DIRNAME: &str = "SERVICE_DIRNAME";
/// Explicit migrations root, takes precedence over [`ENV_SERVICE_DIRNAME`]
pub const ENV_MIGRATIONS_DIR: &str = "DATABASE_MIGRATIONS_DIR";
/// Connect timeout in milliseconds
pub const ENV_CONNECT_TIMEOUT_MS: &str = "DATABASE_CONNECT_TIMEOUT_MS";
/// Default request timeout in milliseconds
pub const ENV_REQUEST_TIMEOUT_MS: &str = "DATABASE_REQUEST_TIMEOUT_MS";

/// Default time allowed to establish a session
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default per-statement timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest keyspace name CQL accepts
const MAX_KEYSPACE_LEN: usize = 48;

/// Errors that can occur while building a [`DatabaseConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No contact points configured
    #[error("no contact points configured, define DATABASE_CQL_CONTACT_POINTS in the environment")]
    MissingContactPoints,

    /// Contact points are not a JSON array of strings
    #[error("DATABASE_CQL_CONTACT_POINTS must be a JSON array of strings: {0}")]
    InvalidContactPoints(String),

    /// A contact point is blank
    #[error("contact point #{0} is empty")]
    EmptyContactPoint(usize),

    /// No keyspace configured
    #[error("no keyspace configured, define DATABASE_CQL_KEYSPACE in the environment")]
    MissingKeyspace,

    /// Keyspace is not a valid unquoted CQL identifier
    #[error("invalid keyspace name '{0}': expected a lowercase letter followed by up to 47 lowercase letters, digits or underscores")]
    InvalidKeyspace(String),

    /// Neither a migrations root nor a service directory was configured
    #[error("no migrations directory configured, define SERVICE_DIRNAME or DATABASE_MIGRATIONS_DIR")]
    MissingMigrationsRoot,

    /// Driver name does not match any known driver
    #[error("unknown database driver '{0}'")]
    UnknownDriver(String),

    /// Driver is known but was not compiled in
    #[error("database driver '{driver}' is not available, rebuild with the '{feature}' feature")]
    DriverUnavailable {
        /// Driver name
        driver: &'static str,
        /// Cargo feature providing it
        feature: &'static str,
    },

    /// The resolved driver does not match the configured one
    #[error("configured driver is '{configured}' but the supplied driver is '{supplied}'")]
    DriverMismatch {
        /// Driver named in the configuration
        configured: DriverKind,
        /// Driver actually passed in
        supplied: DriverKind,
    },

    /// A value could not be parsed
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Environment variable or config key
        key: String,
        /// What was wrong with it
        message: String,
    },

    /// Config file could not be read
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// File that was being read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has unknown keys
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where to connect: contact points and keyspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Bootstrap hosts, in order
    pub contact_points: Vec<String>,

    /// Keyspace the service works in
    pub keyspace: String,
}

impl ConnectionConfig {
    /// Creates a validated connection configuration
    pub fn new<I, S>(contact_points: I, keyspace: impl Into<String>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keyspace: String = keyspace.into();
        let config = Self {
            contact_points: contact_points.into_iter().map(Into::into).collect(),
            keyspace: fold_keyspace(&keyspace),
        };
        config.validate()?;
        Ok(config)
    }

    /// Replaces the keyspace, folded to lowercase
    pub fn set_keyspace(&mut self, keyspace: &str) {
        self.keyspace = fold_keyspace(keyspace);
    }

    /// Checks that contact points and keyspace are present and well-formed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contact_points.is_empty() {
            return Err(ConfigError::MissingContactPoints);
        }
        if let Some(index) = self
            .contact_points
            .iter()
            .position(|cp| cp.trim().is_empty())
        {
            return Err(ConfigError::EmptyContactPoint(index));
        }
        if self.keyspace.is_empty() {
            return Err(ConfigError::MissingKeyspace);
        }
        if !is_valid_keyspace(&self.keyspace) {
            return Err(ConfigError::InvalidKeyspace(self.keyspace.clone()));
        }
        Ok(())
    }
}

/// Returns true for unquoted CQL identifiers usable as keyspace names
///
/// The keyspace is interpolated into ledger statements, so only plain
/// identifiers are accepted. They must already be in the lowercase form CQL
/// folds unquoted identifiers to, since the same name is compared against
/// `system_schema` as a string.
pub fn is_valid_keyspace(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.len() <= MAX_KEYSPACE_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// The name CQL resolves an unquoted keyspace identifier to
fn fold_keyspace(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Migrations root for a service directory: `<service_dir>/../migrations/<driver>`
pub fn migrations_root_for(service_dir: &Path, driver: DriverKind) -> PathBuf {
    service_dir
        .join("..")
        .join("migrations")
        .join(driver.name())
}

/// Complete database configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Which driver to use
    pub driver: DriverKind,

    /// Contact points and keyspace
    pub connection: ConnectionConfig,

    /// Directory containing the `up/` migrations directory
    pub migrations_root: PathBuf,

    /// Time allowed to establish a session
    pub connect_timeout: Duration,

    /// Default per-statement timeout
    pub request_timeout: Duration,
}

impl DatabaseConfig {
    /// Create a builder for constructing configuration
    pub fn builder() -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::default()
    }

    /// Reads configuration from the process environment
    ///
    /// See the `ENV_*` constants for the variables consulted.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary variable lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder();

        if let Some(driver) = get(ENV_DRIVER) {
            builder = builder.driver(driver.parse()?);
        }

        let contact_points = get(ENV_CQL_CONTACT_POINTS).unwrap_or_else(|| "[]".to_string());
        builder = builder.contact_points(parse_contact_points(&contact_points)?);

        if let Some(keyspace) = get(ENV_CQL_KEYSPACE) {
            builder = builder.keyspace(keyspace);
        }

        if let Some(dir) = get(ENV_MIGRATIONS_DIR) {
            builder = builder.migrations_root(dir);
        } else if let Some(dir) = get(ENV_SERVICE_DIRNAME) {
            builder = builder.service_dir(dir);
        }

        if let Some(ms) = get(ENV_CONNECT_TIMEOUT_MS) {
            builder = builder.connect_timeout(parse_millis(ENV_CONNECT_TIMEOUT_MS, &ms)?);
        }
        if let Some(ms) = get(ENV_REQUEST_TIMEOUT_MS) {
            builder = builder.request_timeout(parse_millis(ENV_REQUEST_TIMEOUT_MS, &ms)?);
        }

        builder.build()
    }

    /// Parses a TOML configuration document
    ///
    /// ```toml
    /// driver = "cql"
    /// contact_points = ["127.0.0.1:9042"]
    /// keyspace = "paperwork_users"
    /// migrations_root = "migrations/cql"
    /// request_timeout_ms = 10000
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(source)?;
        file.into_builder()?.build()
    }

    /// Reads and parses a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks the connection settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()
    }

    /// Keyspace shorthand
    pub fn keyspace(&self) -> &str {
        &self.connection.keyspace
    }
}

/// Parses the contact points JSON array
fn parse_contact_points(raw: &str) -> Result<Vec<String>, ConfigError> {
    let points: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| ConfigError::InvalidContactPoints(e.to_string()))?;
    if points.is_empty() {
        return Err(ConfigError::MissingContactPoints);
    }
    Ok(points)
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// On-disk configuration layout
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    driver: Option<String>,
    #[serde(default)]
    contact_points: Vec<String>,
    keyspace: Option<String>,
    migrations_root: Option<PathBuf>,
    service_dir: Option<PathBuf>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl FileConfig {
    fn into_builder(self) -> Result<DatabaseConfigBuilder, ConfigError> {
        let mut builder = DatabaseConfig::builder().contact_points(self.contact_points);
        if let Some(driver) = self.driver {
            builder = builder.driver(driver.parse()?);
        }
        if let Some(keyspace) = self.keyspace {
            builder = builder.keyspace(keyspace);
        }
        if let Some(root) = self.migrations_root {
            builder = builder.migrations_root(root);
        }
        if let Some(dir) = self.service_dir {
            builder = builder.service_dir(dir);
        }
        if let Some(ms) = self.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.request_timeout_ms {
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        Ok(builder)
    }
}

/// Builder for [`DatabaseConfig`]
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfigBuilder {
    driver: DriverKind,
    contact_points: Vec<String>,
    keyspace: Option<String>,
    migrations_root: Option<PathBuf>,
    service_dir: Option<PathBuf>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl DatabaseConfigBuilder {
    /// Select the driver
    pub fn driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    /// Append one contact point
    pub fn contact_point(mut self, contact_point: impl Into<String>) -> Self {
        self.contact_points.push(contact_point.into());
        self
    }

    /// Append several contact points
    pub fn contact_points<I, S>(mut self, contact_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contact_points
            .extend(contact_points.into_iter().map(Into::into));
        self
    }

    /// Set the keyspace
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Set the migrations root explicitly
    pub fn migrations_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.migrations_root = Some(root.into());
        self
    }

    /// Derive the migrations root from the service directory
    ///
    /// Ignored when [`DatabaseConfigBuilder::migrations_root`] is set.
    pub fn service_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.service_dir = Some(dir.into());
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the default request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<DatabaseConfig, ConfigError> {
        let connection = ConnectionConfig {
            contact_points: self.contact_points,
            keyspace: self.keyspace.as_deref().map(fold_keyspace).unwrap_or_default(),
        };
        connection.validate()?;

        let migrations_root = match (self.migrations_root, self.service_dir) {
            (Some(root), _) => root,
            (None, Some(dir)) => migrations_root_for(&dir, self.driver),
            (None, None) => return Err(ConfigError::MissingMigrationsRoot),
        };

        Ok(DatabaseConfig {
            driver: self.driver,
            connection,
            migrations_root,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        })
    }
}
