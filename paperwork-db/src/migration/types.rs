//! Types for migration management

use super::MigrationError;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A migration script discovered on disk
///
/// Filenames sort in application order, so they carry a zero-padded
/// sequence number or timestamp prefix (`0001_create_users.cql`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationFile {
    /// File name within the `up/` directory
    pub filename: String,
}

impl MigrationFile {
    /// Creates a migration file entry
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}

/// A ledger entry for a migration that executed successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// File name of the applied script
    pub filename: String,

    /// When the script finished executing
    pub applied_at: DateTime<Utc>,
}

/// Available and applied migrations, and what is left to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// All discovered filenames, sorted
    pub available: Vec<String>,

    /// All recorded filenames, sorted
    pub applied: Vec<String>,

    /// Suffix of `available` still to be applied, in application order
    pub pending: Vec<String>,
}

impl MigrationPlan {
    /// Computes the diff between available and applied filenames
    ///
    /// Both inputs are sorted first. When there are no more available
    /// migrations than applied ones nothing is pending. Otherwise the pending
    /// migrations are the last `available - applied` available filenames.
    /// The result is not checked; see [`MigrationPlan::validate`].
    pub fn diff(mut available: Vec<String>, mut applied: Vec<String>) -> Self {
        available.sort();
        applied.sort();

        let pending = if available.len() > applied.len() {
            available[applied.len()..].to_vec()
        } else {
            Vec::new()
        };

        Self {
            available,
            applied,
            pending,
        }
    }

    /// Checks that the ledger is a prefix of the available migrations
    ///
    /// Fails with [`MigrationError::Integrity`] if any pending filename is
    /// already recorded as applied.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let applied: HashSet<&str> = self.applied.iter().map(String::as_str).collect();
        let conflicting: Vec<String> = self
            .pending
            .iter()
            .filter(|filename| applied.contains(filename.as_str()))
            .cloned()
            .collect();

        if !conflicting.is_empty() {
            return Err(MigrationError::Integrity { conflicting });
        }

        if self.pending.is_empty() {
            let available: HashSet<&str> = self.available.iter().map(String::as_str).collect();
            let unknown: Vec<&str> = applied
                .iter()
                .filter(|filename| !available.contains(*filename))
                .copied()
                .collect();
            if !unknown.is_empty() {
                warn!("Database: ledger contains migrations with no script on disk: {unknown:?}");
            }
        }

        Ok(())
    }

    /// [`MigrationPlan::diff`] followed by [`MigrationPlan::validate`]
    pub fn compute(available: Vec<String>, applied: Vec<String>) -> Result<Self, MigrationError> {
        let plan = Self::diff(available, applied);
        plan.validate()?;
        Ok(plan)
    }

    /// True when there is nothing to apply
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of a successful migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Migrations applied and recorded by this run, in order
    pub applied: Vec<MigrationRecord>,

    /// Number of migrations that were already recorded before the run
    pub already_applied: usize,
}

impl MigrationReport {
    /// True when the run applied nothing
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }

    /// Filenames applied by this run
    pub fn applied_filenames(&self) -> Vec<&str> {
        self.applied.iter().map(|r| r.filename.as_str()).collect()
    }
}
