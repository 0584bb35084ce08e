use super::{
    Ledger, MigrationError, MigrationPlan, MigrationRecord, MigrationReport, MigrationSource,
};
use crate::config::DatabaseConfig;
use crate::connection::ConnectionManager;
use crate::driver::{Connection, DatabaseDriver};
use crate::events::{MigrationEvent, MigrationHook, RunState};
use crate::executor::{QueryExecutor, QueryOutcome};
use crate::query::Statement;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Applies outstanding migrations to a keyspace
///
/// A run opens one bootstrap connection (not bound to the keyspace, which
/// may not exist yet), reads the available scripts and the ledger, and
/// applies the pending scripts one at a time in filename order. The first
/// failure stops the run. The connection is closed exactly once on every
/// path.
pub struct MigrationRunner {
    connections: ConnectionManager,
    source: MigrationSource,
    hooks: Vec<Arc<dyn MigrationHook>>,
}

impl MigrationRunner {
    /// Creates a runner for the configured keyspace and migrations root
    pub fn new(config: Arc<DatabaseConfig>, driver: Arc<dyn DatabaseDriver>) -> Self {
        Self::with_connections(ConnectionManager::new(driver, config))
    }

    /// Creates a runner that shares an existing connection manager
    pub fn with_connections(connections: ConnectionManager) -> Self {
        let source = MigrationSource::new(connections.config().migrations_root.clone());
        Self {
            connections,
            source,
            hooks: Vec::new(),
        }
    }

    /// Registers a hook that receives [`MigrationEvent`]s
    pub fn with_hook(mut self, hook: impl MigrationHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Registers already shared hooks
    pub fn with_hooks(mut self, hooks: impl IntoIterator<Item = Arc<dyn MigrationHook>>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    /// Where scripts are read from
    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    fn keyspace(&self) -> &str {
        self.connections.config().keyspace()
    }

    fn emit(&self, event: MigrationEvent) {
        for hook in &self.hooks {
            hook.on_event(&event);
        }
    }

    fn set_state(&self, state: RunState) {
        debug!("Database: migration run {state}");
        self.emit(MigrationEvent::StateChanged(state));
    }

    /// Computes and validates the plan without applying anything
    pub async fn plan(&self) -> Result<MigrationPlan, MigrationError> {
        let connection = self.connections.connect(None).await?;
        let result = async {
            let mut ledger = Ledger::new(QueryExecutor::new(&*connection), self.keyspace());
            let plan = self.read_plan(&mut ledger).await?;
            plan.validate()?;
            Ok::<_, MigrationError>(plan)
        }
        .await;
        self.release(connection, result).await
    }

    /// Applies every pending migration
    ///
    /// Returns the records written by this run. On error, migrations applied
    /// before the failing one stay applied and recorded.
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        self.set_state(RunState::Idle);

        let connection = match self.connections.connect(None).await {
            Ok(connection) => connection,
            Err(err) => {
                self.set_state(RunState::Failed);
                return Err(err.into());
            }
        };
        self.set_state(RunState::Connected);

        let result = self.apply(&*connection).await;
        let result = self.release(connection, result).await;

        match &result {
            Ok(report) => {
                info!(
                    "Database: migrations complete ({} applied, {} already applied)",
                    report.applied.len(),
                    report.already_applied
                );
                self.set_state(RunState::Completed);
            }
            Err(err) => {
                warn!("Database: migration run failed: {err}");
                self.set_state(RunState::Failed);
            }
        }
        result
    }

    /// Reads both sets concurrently and diffs them
    async fn read_plan(&self, ledger: &mut Ledger<'_>) -> Result<MigrationPlan, MigrationError> {
        let (available, applied) =
            tokio::join!(self.source.list_available(), ledger.read_applied());

        let available: Vec<String> = available?.into_iter().map(|file| file.filename).collect();
        let applied: Vec<String> = applied?.into_iter().map(|record| record.filename).collect();
        Ok(MigrationPlan::diff(available, applied))
    }

    async fn apply(&self, connection: &dyn Connection) -> Result<MigrationReport, MigrationError> {
        let executor = QueryExecutor::new(connection);
        let mut ledger = Ledger::new(executor, self.keyspace());

        let plan = self.read_plan(&mut ledger).await?;
        self.set_state(RunState::Diffed);

        plan.validate()?;
        self.set_state(RunState::Validated);

        let mut report = MigrationReport {
            applied: Vec::with_capacity(plan.pending.len()),
            already_applied: plan.applied.len(),
        };

        if plan.is_up_to_date() {
            if plan.applied.len() > plan.available.len() {
                warn!(
                    "Database: {} migrations recorded but only {} available",
                    plan.applied.len(),
                    plan.available.len()
                );
            }
            info!("Database: keyspace '{}' is up to date", self.keyspace());
            return Ok(report);
        }

        let total = plan.pending.len();
        info!(
            "Database: applying {total} migration(s) to keyspace '{}'",
            self.keyspace()
        );

        for (index, filename) in plan.pending.iter().enumerate() {
            self.set_state(RunState::Applying {
                index: index + 1,
                total,
                filename: filename.clone(),
            });
            self.emit(MigrationEvent::MigrationStarted {
                filename: filename.clone(),
            });

            let started = Instant::now();
            match self.apply_one(executor, &mut ledger, filename).await {
                Ok(record) => {
                    info!("Database: applied migration {filename}");
                    self.emit(MigrationEvent::MigrationApplied {
                        record: record.clone(),
                        duration: started.elapsed(),
                    });
                    report.applied.push(record);
                }
                Err(err) => {
                    self.emit(MigrationEvent::MigrationFailed {
                        filename: filename.clone(),
                        error: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }

        Ok(report)
    }

    async fn apply_one(
        &self,
        executor: QueryExecutor<'_>,
        ledger: &mut Ledger<'_>,
        filename: &str,
    ) -> Result<MigrationRecord, MigrationError> {
        let script = self.source.read_content(filename).await?;

        if let QueryOutcome::Failed(source) = executor.execute(&Statement::new(script)).await {
            return Err(MigrationError::Execution {
                filename: filename.to_string(),
                source,
            });
        }

        ledger.record(filename).await
    }

    /// Closes the run's connection and merges the close result into `result`
    ///
    /// A failed close fails an otherwise successful run. If the run already
    /// failed, the original error is kept.
    async fn release<T>(
        &self,
        connection: Box<dyn Connection>,
        result: Result<T, MigrationError>,
    ) -> Result<T, MigrationError> {
        match (self.connections.disconnect(connection).await, result) {
            (Ok(()), result) => result,
            (Err(err), Ok(_)) => Err(err.into()),
            (Err(err), Err(original)) => {
                warn!("Database: {err} (after: {original})");
                Err(original)
            }
        }
    }
}
