//! Shared helpers for integration tests

#![allow(dead_code)]

use paperwork_db::migration::UP_DIR;
use paperwork_db::{DatabaseConfig, MigrationEvent, MigrationHook};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A temporary migrations root with an `up/` directory
pub struct MigrationDir {
    dir: TempDir,
}

impl MigrationDir {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(UP_DIR)).unwrap();
        Self { dir }
    }

    /// Adds a script to `up/`
    pub fn with_script(self, filename: &str, cql: &str) -> Self {
        self.add_script(filename, cql);
        self
    }

    /// Adds a script to `up/` after construction, e.g. between runs
    pub fn add_script(&self, filename: &str, cql: &str) {
        std::fs::write(self.dir.path().join(UP_DIR).join(filename), cql).unwrap();
    }

    /// The migrations root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration pointing at this directory and keyspace `app`
    pub fn config(&self) -> DatabaseConfig {
        DatabaseConfig::builder()
            .contact_point("127.0.0.1:9042")
            .keyspace("app")
            .migrations_root(self.dir.path())
            .build()
            .unwrap()
    }
}

/// Scripts `001_a` .. `003_c`, each creating one table in `app`
pub fn abc() -> MigrationDir {
    MigrationDir::new()
        .with_script("001_a", "CREATE TABLE app.a (id int PRIMARY KEY)")
        .with_script("002_b", "CREATE TABLE app.b (id int PRIMARY KEY)")
        .with_script("003_c", "CREATE TABLE app.c (id int PRIMARY KEY)")
}

/// Collects event type names for verification
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl MigrationHook for EventCollector {
    fn on_event(&self, event: &MigrationEvent) {
        let event_type = match event {
            MigrationEvent::StateChanged(state) => format!("state:{state}"),
            MigrationEvent::MigrationStarted { filename } => format!("started:{filename}"),
            MigrationEvent::MigrationApplied { record, .. } => {
                format!("applied:{}", record.filename)
            }
            MigrationEvent::MigrationFailed { filename, .. } => format!("failed:{filename}"),
        };
        self.events.lock().unwrap().push(event_type);
    }
}
