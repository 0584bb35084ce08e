//! Service-facing database handle
//!
//! [`Database`] ties the pieces together for a service: on
//! [`Database::initialize`] it runs the migration pass, then opens the
//! long-lived connection bound to the configured keyspace and flips the
//! readiness signal. Collaborators that must not start before the schema is
//! in place (request handlers, bus listeners) wait on [`Database::readiness`].

use crate::config::{ConfigError, DatabaseConfig};
use crate::connection::ConnectionManager;
use crate::driver::{self, Connection, DatabaseDriver, DriverError};
use crate::error::{Error, Result};
use crate::events::MigrationHook;
use crate::executor::{QueryExecutor, QueryOutcome};
use crate::migration::{MigrationPlan, MigrationReport, MigrationRunner};
use crate::query::{ResultSet, Statement};
use crate::users::Users;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Statement used by [`Database::check_health`]
pub const HEALTH_CHECK_CQL: &str = "SELECT release_version FROM system.local";

/// Readiness of a [`Database`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Not initialized yet, or shut down
    Pending,
    /// Migrations are applied and the service connection is open
    Ready,
    /// Initialization failed
    Failed(String),
}

impl Readiness {
    /// True once initialization has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// True for [`Readiness::Ready`]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// The database layer of a service
pub struct Database {
    connections: ConnectionManager,
    readiness: watch::Sender<Readiness>,
    service: RwLock<Option<Box<dyn Connection>>>,
    hooks: Vec<Arc<dyn MigrationHook>>,
}

impl Database {
    /// Creates a database handle from a configuration and a driver
    pub fn new(config: DatabaseConfig, driver: Arc<dyn DatabaseDriver>) -> Result<Self> {
        config.validate()?;
        if driver.kind() != config.driver {
            return Err(ConfigError::DriverMismatch {
                configured: config.driver,
                supplied: driver.kind(),
            }
            .into());
        }

        let (readiness, _) = watch::channel(Readiness::Pending);
        Ok(Self {
            connections: ConnectionManager::new(driver, Arc::new(config)),
            readiness,
            service: RwLock::new(None),
            hooks: Vec::new(),
        })
    }

    /// Creates a database handle using the driver named in the configuration
    pub fn from_config(config: DatabaseConfig) -> Result<Self> {
        let driver = driver::resolve(config.driver)?;
        Self::new(config, driver)
    }

    /// Creates a database handle configured from the environment
    pub fn from_env() -> Result<Self> {
        Self::from_config(DatabaseConfig::from_env()?)
    }

    /// Registers a hook that observes migration runs
    pub fn with_hook(mut self, hook: impl MigrationHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// The configuration in use
    pub fn config(&self) -> &DatabaseConfig {
        self.connections.config()
    }

    /// Subscribes to readiness changes
    pub fn readiness(&self) -> watch::Receiver<Readiness> {
        self.readiness.subscribe()
    }

    /// True when the service connection is open
    pub fn is_ready(&self) -> bool {
        self.readiness.borrow().is_ready()
    }

    /// Waits until initialization has finished and returns the outcome
    pub async fn wait_ready(&self) -> Readiness {
        let mut receiver = self.readiness.subscribe();
        receiver
            .wait_for(Readiness::is_terminal)
            .await
            .map(|state| state.clone())
            .unwrap_or_else(|_| Readiness::Failed("readiness channel closed".to_string()))
    }

    fn migration_runner(&self) -> MigrationRunner {
        MigrationRunner::with_connections(self.connections.clone())
            .with_hooks(self.hooks.iter().cloned())
    }

    /// Computes the migration plan without applying anything
    pub async fn migration_plan(&self) -> Result<MigrationPlan> {
        Ok(self.migration_runner().plan().await?)
    }

    /// Applies pending migrations and opens the service connection
    ///
    /// Publishes [`Readiness::Ready`] on success and [`Readiness::Failed`]
    /// otherwise. Calling this on an initialized database does nothing.
    pub async fn initialize(&self) -> Result<MigrationReport> {
        let mut service = self.service.write().await;
        if service.is_some() {
            debug!("Database: already initialized");
            return Ok(MigrationReport::default());
        }
        self.readiness.send_replace(Readiness::Pending);

        let report = match self.migration_runner().run().await {
            Ok(report) => report,
            Err(err) => return Err(self.fail(err.into())),
        };

        let keyspace = self.config().keyspace();
        match self.connections.connect(Some(keyspace)).await {
            Ok(connection) => *service = Some(connection),
            Err(err) => return Err(self.fail(err.into())),
        }

        info!("Database: ready (keyspace '{keyspace}')");
        self.readiness.send_replace(Readiness::Ready);
        Ok(report)
    }

    fn fail(&self, err: Error) -> Error {
        error!("Database: initialization failed: {err}");
        self.readiness
            .send_replace(Readiness::Failed(err.to_string()));
        err
    }

    /// Executes a statement on the service connection
    ///
    /// Returns [`QueryOutcome::Failed`] with [`DriverError::NotConnected`]
    /// before initialization and after shutdown.
    pub async fn execute(&self, statement: &Statement) -> QueryOutcome {
        let service = self.service.read().await;
        match service.as_deref() {
            Some(connection) => QueryExecutor::new(connection).execute(statement).await,
            None => QueryOutcome::Failed(DriverError::NotConnected),
        }
    }

    /// Runs a lookup expected to match at most one row
    ///
    /// Returns the result only when exactly one row came back. Zero or
    /// several rows read as `None`.
    pub async fn fetch_one(&self, statement: &Statement) -> Result<Option<ResultSet>> {
        match self.execute(statement).await {
            QueryOutcome::Rows(rows) if rows.len() == 1 => Ok(Some(rows)),
            QueryOutcome::Rows(rows) => {
                debug!(
                    "Database: expected one row, got {} for {}",
                    rows.len(),
                    statement.summary()
                );
                Ok(None)
            }
            QueryOutcome::Empty => Ok(None),
            QueryOutcome::Failed(err) => Err(err.into()),
        }
    }

    /// The `users` collection on the service connection
    pub fn users(&self) -> Users<'_> {
        Users::new(self)
    }

    /// Returns true if the store answers on the service connection
    pub async fn check_health(&self) -> bool {
        let probe = Statement::new(HEALTH_CHECK_CQL).idempotent();
        match self.execute(&probe).await {
            QueryOutcome::Rows(rows) => {
                if let Some(version) = rows.rows().next().and_then(|row| row.text("release_version")) {
                    debug!("Database: health check ok (release {version})");
                }
                true
            }
            QueryOutcome::Empty => true,
            QueryOutcome::Failed(err) => {
                warn!("Database: health check failed: {err}");
                false
            }
        }
    }

    /// Closes the service connection
    ///
    /// Readiness goes back to [`Readiness::Pending`].
    pub async fn shutdown(&self) -> Result<()> {
        let connection = self.service.write().await.take();
        self.readiness.send_replace(Readiness::Pending);
        if let Some(connection) = connection {
            info!("Database: shutting down");
            self.connections.disconnect(connection).await?;
        }
        Ok(())
    }
}
