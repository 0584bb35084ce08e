//! Statement execution with a three-way outcome
//!
//! [`QueryExecutor`] never returns an error. A statement either produced
//! rows, completed without rows, or failed; failures are logged here and
//! handed back as [`QueryOutcome::Failed`] so callers can tell "nothing
//! there" apart from "the store had a problem".

use crate::driver::{Connection, DriverError};
use crate::query::{ResultSet, Statement};
use log::{trace, warn};

/// Result of executing one statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The statement returned at least one row
    Rows(ResultSet),
    /// The statement completed and returned no rows
    Empty,
    /// The statement could not be executed
    Failed(DriverError),
}

impl QueryOutcome {
    /// True for [`QueryOutcome::Rows`] and [`QueryOutcome::Empty`]
    pub fn is_success(&self) -> bool {
        !self.is_failed()
    }

    /// True for [`QueryOutcome::Failed`]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returned rows, if any
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Converts into a `Result`, mapping `Empty` to `None`
    pub fn into_result(self) -> Result<Option<ResultSet>, DriverError> {
        match self {
            Self::Rows(rows) => Ok(Some(rows)),
            Self::Empty => Ok(None),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Executes statements on a borrowed connection
#[derive(Clone, Copy)]
pub struct QueryExecutor<'c> {
    connection: &'c dyn Connection,
}

impl<'c> QueryExecutor<'c> {
    /// Binds an executor to a connection
    pub fn new(connection: &'c dyn Connection) -> Self {
        Self { connection }
    }

    /// Executes a single statement
    pub async fn execute(&self, statement: &Statement) -> QueryOutcome {
        trace!("Database: executing {}", statement.summary());
        match self.connection.execute(statement).await {
            Ok(rows) if rows.is_empty() => QueryOutcome::Empty,
            Ok(rows) => QueryOutcome::Rows(rows),
            Err(err) => {
                warn!(
                    "Database: statement failed ({}): {err}",
                    statement.summary()
                );
                QueryOutcome::Failed(err)
            }
        }
    }
}
