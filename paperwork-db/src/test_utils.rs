//! In-memory driver for tests
//!
//! [`MemoryDriver`] understands the statements the migration engine issues
//! (schema probes, ledger reads and writes, `CREATE KEYSPACE` and
//! `CREATE TABLE`) and accepts everything else as a no-op. It records every
//! statement in execution order and supports canned results and failure
//! injection.
//!
//! ```ignore
//! use paperwork_db::test_utils::MemoryDriver;
//!
//! let driver = MemoryDriver::new()
//!     .with_applied("app", ["001_a.cql"])
//!     .fail_on("app.broken");
//! assert!(driver.has_table("app", "migrations"));
//! ```

use crate::driver::{
    Connection, ConnectTarget, DatabaseDriver, DiagnosticLevel, DiagnosticSink, DriverDiagnostic,
    DriverError, DriverKind,
};
use crate::migration::MIGRATIONS_TABLE;
use crate::query::{ResultSet, Statement, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    keyspaces: BTreeMap<String, BTreeSet<String>>,
    ledgers: BTreeMap<String, Vec<(String, DateTime<Utc>)>>,
    executed: Vec<String>,
    canned: Vec<(String, ResultSet)>,

    fail_on: Vec<String>,
    fail_connect: Option<String>,
    fail_close: bool,
    fail_ledger_reads: bool,
    fail_ledger_writes: bool,

    connects: usize,
    disconnects: usize,
    open: usize,
    connected_keyspaces: Vec<Option<String>>,
    in_flight: usize,
    max_in_flight: usize,
}

impl State {
    fn create_table(
        &mut self,
        keyspace: &str,
        table: &str,
        if_not_exists: bool,
    ) -> Result<(), DriverError> {
        let tables = self.keyspaces.get_mut(keyspace).ok_or_else(|| {
            DriverError::InvalidQuery(format!("Keyspace {keyspace} does not exist"))
        })?;
        if !tables.insert(table.to_string()) && !if_not_exists {
            return Err(DriverError::InvalidQuery(format!(
                "Table {keyspace}.{table} already exists"
            )));
        }
        if table == MIGRATIONS_TABLE {
            self.ledgers.entry(keyspace.to_string()).or_default();
        }
        Ok(())
    }

    fn ledger_table(&self, qualified: &str) -> Result<String, DriverError> {
        let (keyspace, table) = qualified
            .split_once('.')
            .ok_or_else(|| DriverError::InvalidQuery(format!("unqualified table {qualified}")))?;
        let exists = self
            .keyspaces
            .get(keyspace)
            .is_some_and(|tables| tables.contains(table));
        if !exists {
            return Err(DriverError::InvalidQuery(format!(
                "unconfigured table {table}"
            )));
        }
        Ok(keyspace.to_string())
    }

    fn interpret(
        &mut self,
        session_keyspace: Option<&str>,
        statement: &Statement,
    ) -> Result<ResultSet, DriverError> {
        let flat = statement.cql.split_whitespace().collect::<Vec<_>>().join(" ");
        let lower = flat.to_ascii_lowercase();
        self.executed.push(flat);

        if let Some(fragment) = self
            .fail_on
            .iter()
            .find(|fragment| lower.contains(&fragment.to_ascii_lowercase()))
        {
            return Err(DriverError::InvalidQuery(format!(
                "injected failure on '{fragment}'"
            )));
        }

        if let Some((_, rows)) = self
            .canned
            .iter()
            .find(|(fragment, _)| lower.contains(&fragment.to_ascii_lowercase()))
        {
            return Ok(rows.clone());
        }

        let param = |index: usize| {
            statement
                .params
                .get(index)
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string()
        };

        if lower.starts_with("select keyspace_name from system_schema.keyspaces") {
            let keyspace = param(0);
            let mut rows = ResultSet::new(vec!["keyspace_name".into()]);
            if self.keyspaces.contains_key(&keyspace) {
                rows.push_row(vec![Value::from(keyspace)]);
            }
            return Ok(rows);
        }

        if lower.starts_with("select table_name from system_schema.tables") {
            let (keyspace, table) = (param(0), param(1));
            let mut rows = ResultSet::new(vec!["table_name".into()]);
            if self
                .keyspaces
                .get(&keyspace)
                .is_some_and(|tables| tables.contains(&table))
            {
                rows.push_row(vec![Value::from(table)]);
            }
            return Ok(rows);
        }

        if lower.starts_with("select release_version from system.local") {
            return Ok(ResultSet::new(vec!["release_version".into()])
                .with_row(vec![Value::from("memory")]));
        }

        if let Some(rest) = lower.strip_prefix("select filename, migrated_at from ") {
            if self.fail_ledger_reads {
                return Err(DriverError::Server("injected ledger read failure".to_string()));
            }
            let keyspace = self.ledger_table(first_word(rest))?;
            let mut rows = ResultSet::new(vec!["filename".into(), "migrated_at".into()]);
            for (filename, applied_at) in self.ledgers.get(&keyspace).into_iter().flatten() {
                rows.push_row(vec![Value::from(filename.as_str()), Value::from(*applied_at)]);
            }
            return Ok(rows);
        }

        if let Some(rest) = lower.strip_prefix("insert into ") {
            let target = first_word(rest);
            if target.ends_with(&format!(".{MIGRATIONS_TABLE}")) {
                if self.fail_ledger_writes {
                    return Err(DriverError::Timeout("injected ledger write failure".to_string()));
                }
                let keyspace = self.ledger_table(target)?;
                let filename = param(0);
                let applied_at = statement
                    .params
                    .get(1)
                    .and_then(Value::as_timestamp)
                    .unwrap_or_else(Utc::now);
                let ledger = self.ledgers.entry(keyspace).or_default();
                ledger.retain(|(existing, _)| *existing != filename);
                ledger.push((filename, applied_at));
            }
            return Ok(ResultSet::default());
        }

        if let Some(rest) = lower.strip_prefix("create keyspace ") {
            let (if_not_exists, name) = create_target(rest);
            if self.keyspaces.contains_key(name) {
                if !if_not_exists {
                    return Err(DriverError::InvalidQuery(format!(
                        "Keyspace {name} already exists"
                    )));
                }
            } else {
                self.keyspaces.insert(name.to_string(), BTreeSet::new());
            }
            return Ok(ResultSet::default());
        }

        if let Some(rest) = lower.strip_prefix("create table ") {
            let (if_not_exists, name) = create_target(rest);
            let (keyspace, table) = match name.split_once('.') {
                Some((keyspace, table)) => (keyspace.to_string(), table.to_string()),
                None => match session_keyspace {
                    Some(keyspace) => (keyspace.to_string(), name.to_string()),
                    None => {
                        return Err(DriverError::InvalidQuery(
                            "No keyspace has been specified".to_string(),
                        ))
                    }
                },
            };
            self.create_table(&keyspace, &table, if_not_exists)?;
            return Ok(ResultSet::default());
        }

        Ok(ResultSet::default())
    }
}

/// First whitespace- or paren-delimited word
fn first_word(s: &str) -> &str {
    s.trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or_default()
}

/// Parses `[IF NOT EXISTS] <name> ...`
fn create_target(rest: &str) -> (bool, &str) {
    match rest.trim_start().strip_prefix("if not exists ") {
        Some(rest) => (true, first_word(rest)),
        None => (false, first_word(rest)),
    }
}

fn is_internal(cql: &str) -> bool {
    let lower = cql.to_ascii_lowercase();
    let ledger = format!(".{MIGRATIONS_TABLE}");
    lower.contains("system_schema.")
        || lower.contains("system.local")
        || lower
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .any(|word| word.ends_with(&ledger))
}

/// A deterministic in-memory [`DatabaseDriver`]
///
/// Clones share state, so a test can hand a clone to the code under test and
/// inspect the original afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<State>>,
}

impl MemoryDriver {
    /// Creates an empty store with no keyspaces
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an empty keyspace
    pub fn with_keyspace(self, keyspace: &str) -> Self {
        self.lock()
            .keyspaces
            .entry(keyspace.to_string())
            .or_default();
        self
    }

    /// Adds a keyspace with a ledger table holding `filenames`
    pub fn with_applied<I, S>(self, keyspace: &str, filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.lock();
            state
                .keyspaces
                .entry(keyspace.to_string())
                .or_default()
                .insert(MIGRATIONS_TABLE.to_string());
            let ledger = state.ledgers.entry(keyspace.to_string()).or_default();
            for filename in filenames {
                ledger.push((filename.into(), Utc::now()));
            }
        }
        self
    }

    /// Answers every statement containing `fragment` (case-insensitive) with
    /// `rows`
    pub fn with_rows(self, fragment: impl Into<String>, rows: ResultSet) -> Self {
        self.lock().canned.push((fragment.into(), rows));
        self
    }

    /// Fails every statement containing `fragment` (case-insensitive)
    pub fn fail_on(self, fragment: impl Into<String>) -> Self {
        self.lock().fail_on.push(fragment.into());
        self
    }

    /// Fails every connection attempt with `message`
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.lock().fail_connect = Some(message.into());
        self
    }

    /// Reports an error when a connection is closed; the connection is still
    /// released
    pub fn fail_close(self) -> Self {
        self.lock().fail_close = true;
        self
    }

    /// Fails every ledger `SELECT`
    pub fn fail_ledger_reads(self) -> Self {
        self.lock().fail_ledger_reads = true;
        self
    }

    /// Fails every ledger `INSERT`
    pub fn fail_ledger_writes(self) -> Self {
        self.lock().fail_ledger_writes = true;
        self
    }

    /// Every executed statement, whitespace-flattened, in order
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Executed statements other than schema probes and ledger access
    pub fn user_statements(&self) -> Vec<String> {
        self.lock()
            .executed
            .iter()
            .filter(|cql| !is_internal(cql))
            .cloned()
            .collect()
    }

    /// Filenames recorded in the ledger of `keyspace`, in insertion order
    pub fn applied(&self, keyspace: &str) -> Vec<String> {
        self.lock()
            .ledgers
            .get(keyspace)
            .map(|ledger| ledger.iter().map(|(filename, _)| filename.clone()).collect())
            .unwrap_or_default()
    }

    /// True if `keyspace` exists
    pub fn has_keyspace(&self, keyspace: &str) -> bool {
        self.lock().keyspaces.contains_key(keyspace)
    }

    /// True if `keyspace.table` exists
    pub fn has_table(&self, keyspace: &str, table: &str) -> bool {
        self.lock()
            .keyspaces
            .get(keyspace)
            .is_some_and(|tables| tables.contains(table))
    }

    /// Successful connection attempts
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Calls to [`Connection::close`]
    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.lock().open
    }

    /// Keyspace of each successful connection, in order
    pub fn connected_keyspaces(&self) -> Vec<Option<String>> {
        self.lock().connected_keyspaces.clone()
    }

    /// Highest number of statements observed in flight at the same time
    pub fn max_concurrent_statements(&self) -> usize {
        self.lock().max_in_flight
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Cql
    }

    async fn connect(
        &self,
        target: &ConnectTarget,
        sink: DiagnosticSink,
    ) -> Result<Box<dyn Connection>, DriverError> {
        {
            let mut state = self.lock();
            if let Some(message) = &state.fail_connect {
                return Err(DriverError::Connection(message.clone()));
            }
            if let Some(keyspace) = &target.keyspace {
                if !state.keyspaces.contains_key(keyspace) {
                    return Err(DriverError::InvalidQuery(format!(
                        "Keyspace '{keyspace}' does not exist"
                    )));
                }
            }
            state.connects += 1;
            state.open += 1;
            state.connected_keyspaces.push(target.keyspace.clone());
        }

        sink(DriverDiagnostic::new(
            DiagnosticLevel::Info,
            "memory",
            format!("connected to {:?}", target.contact_points),
        ));

        Ok(Box::new(MemoryConnection {
            driver: self.clone(),
            keyspace: target.keyspace.clone(),
        }))
    }
}

struct MemoryConnection {
    driver: MemoryDriver,
    keyspace: Option<String>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        {
            let mut state = self.driver.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        // Give concurrent callers a chance to overlap
        tokio::task::yield_now().await;

        let mut state = self.driver.lock();
        state.in_flight -= 1;
        state.interpret(self.keyspace.as_deref(), statement)
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        let mut state = self.driver.lock();
        state.disconnects += 1;
        state.open = state.open.saturating_sub(1);
        if state.fail_close {
            return Err(DriverError::Connection("injected close failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn open(driver: &MemoryDriver, keyspace: Option<&str>) -> Box<dyn Connection> {
        let target = ConnectTarget {
            contact_points: vec!["memory".into()],
            keyspace: keyspace.map(str::to_string),
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
    async fn test_create_keyspace_and_table() {
        let driver = MemoryDriver::new();
        let conn = open(&driver, None).await;

        conn.execute(&Statement::new(
            "CREATE KEYSPACE IF NOT EXISTS app WITH replication = {'class': 'SimpleStrategy'}",
        ))
        .await
        .unwrap();
        conn.execute(&Statement::new(
            "CREATE TABLE app.users (\n  id uuid PRIMARY KEY\n)",
        ))
        .await
        .unwrap();

        assert!(driver.has_keyspace("app"));
        assert!(driver.has_table("app", "users"));
        assert_eq!(
            driver.user_statements()[1],
            "CREATE TABLE app.users ( id uuid PRIMARY KEY )"
        );
    }

    #[tokio::test]
    async fn test_create_table_requires_keyspace() {
        let driver = MemoryDriver::new();
        let conn = open(&driver, None).await;

        let err = conn
            .execute(&Statement::new("CREATE TABLE users (id uuid PRIMARY KEY)"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidQuery(_)));

        let err = conn
            .execute(&Statement::new("CREATE TABLE nope.users (id uuid PRIMARY KEY)"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_unqualified_table_uses_session_keyspace() {
        let driver = MemoryDriver::new().with_keyspace("app");
        let conn = open(&driver, Some("app")).await;

        conn.execute(&Statement::new("CREATE TABLE notes (id uuid PRIMARY KEY)"))
            .await
            .unwrap();
        assert!(driver.has_table("app", "notes"));
    }

    #[tokio::test]
    async fn test_connect_to_missing_keyspace_fails() {
        let driver = MemoryDriver::new();
        let target = ConnectTarget {
            contact_points: vec!["memory".into()],
            keyspace: Some("app".into()),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        };
        let result = driver
            .connect(&target, Arc::new(|_: DriverDiagnostic| {}))
            .await;
        assert!(result.is_err());
        assert_eq!(driver.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_ledger_statements_are_internal() {
        let driver = MemoryDriver::new().with_applied("app", ["001_a"]);
        let conn = open(&driver, None).await;

        conn.execute(
            &Statement::new("INSERT INTO app.migrations (filename, migrated_at) VALUES (?, ?)")
                .bind("002_b")
                .bind(Utc::now()),
        )
        .await
        .unwrap();
        conn.execute(&Statement::new("ALTER TABLE app.users ADD email text"))
            .await
            .unwrap();

        assert_eq!(driver.applied("app"), vec!["001_a", "002_b"]);
        assert_eq!(
            driver.user_statements(),
            vec!["ALTER TABLE app.users ADD email text"]
        );
        assert_eq!(driver.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_diagnostics_reach_sink() {
        let driver = MemoryDriver::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let target = ConnectTarget {
            contact_points: vec!["memory".into()],
            keyspace: None,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        };

        let conn = driver
            .connect(
                &target,
                Arc::new(move |d: DriverDiagnostic| sink_seen.lock().unwrap().push(d)),
            )
            .await
            .ok()
            .unwrap();
        conn.close().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].level, DiagnosticLevel::Info);
    }
}
