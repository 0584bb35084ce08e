//! Migration error types

use crate::connection::ConnectionError;
use crate::driver::DriverError;
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a migration run
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The store could not be reached, or the run's connection could not be
    /// closed cleanly
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The ledger is not a prefix of the available migrations
    ///
    /// Never resolved automatically: a migration was recorded out of order
    /// or files were renamed after being applied. No statements are
    /// executed once this is detected.
    #[error(
        "migrations seem messed up: {conflicting:?} already applied although earlier migrations are not; please fix manually"
    )]
    Integrity {
        /// Pending filenames that are already present in the ledger
        conflicting: Vec<String>,
    },

    /// The migrations directory or a script could not be read
    #[error("failed to read migrations at '{path}': {source}")]
    Discovery {
        /// Directory or file being read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A migration filename is not valid UTF-8
    #[error("migration filename {0:?} is not valid UTF-8")]
    InvalidFilename(OsString),

    /// The ledger could not be read
    #[error("failed to read the migration ledger: {0}")]
    LedgerRead(#[source] DriverError),

    /// A migration script failed to execute
    #[error("migration '{filename}' failed: {source}")]
    Execution {
        /// Script that failed
        filename: String,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// A migration executed but its ledger record could not be written
    ///
    /// The script's effect is durable but untracked; the next run will try
    /// to execute it again.
    #[error("migration '{filename}' was applied but could not be recorded in the ledger: {source}")]
    LedgerWrite {
        /// Script that ran but is not recorded
        filename: String,
        /// Driver failure
        #[source]
        source: DriverError,
    },
}

impl MigrationError {
    /// Returns true for ledger/prefix inconsistencies that need an operator
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Filename of the migration involved, for execution and ledger-write
    /// failures
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Execution { filename, .. } | Self::LedgerWrite { filename, .. } => {
                Some(filename)
            }
            _ => None,
        }
    }
}
