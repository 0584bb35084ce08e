use std::fmt;
use std::time::Duration;

use crate::migration::MigrationRecord;

/// Phase of a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Nothing has happened yet
    Idle,
    /// The bootstrap connection is open
    Connected,
    /// Available and applied migrations have been read and compared
    Diffed,
    /// The ledger was found to be a prefix of the available migrations
    Validated,
    /// Executing the `index`-th (1-based) of `total` pending migrations
    Applying {
        /// 1-based position among the pending migrations
        index: usize,
        /// Number of pending migrations in this run
        total: usize,
        /// Script being applied
        filename: String,
    },
    /// Every pending migration was applied and recorded
    Completed,
    /// The run stopped with an error
    Failed,
}

impl RunState {
    /// True for [`RunState::Completed`] and [`RunState::Failed`]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connected => f.write_str("connected"),
            Self::Diffed => f.write_str("diffed"),
            Self::Validated => f.write_str("validated"),
            Self::Applying {
                index,
                total,
                filename,
            } => write!(f, "applying {index}/{total} ({filename})"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Events emitted during a migration run
///
/// These events allow observers to follow a run as it happens, e.g. to
/// print progress from a CLI.
#[derive(Debug, Clone)]
pub enum MigrationEvent {
    /// The run moved to a new state
    StateChanged(RunState),

    /// A migration script is about to be executed
    MigrationStarted {
        /// Script filename
        filename: String,
    },

    /// A migration script executed and was recorded
    MigrationApplied {
        /// Ledger record that was written
        record: MigrationRecord,
        /// Time spent executing and recording the script
        duration: Duration,
    },

    /// A migration script failed, or ran but could not be recorded
    MigrationFailed {
        /// Script filename
        filename: String,
        /// Error message
        error: String,
    },
}

/// Hook for observing migration runs
///
/// # Example
/// ```
/// use paperwork_db::events::{MigrationEvent, MigrationHook};
///
/// struct Progress;
///
/// impl MigrationHook for Progress {
///     fn on_event(&self, event: &MigrationEvent) {
///         if let MigrationEvent::MigrationApplied { record, .. } = event {
///             println!("applied {}", record.filename);
///         }
///     }
/// }
/// ```
pub trait MigrationHook: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &MigrationEvent);
}

/// Blanket implementation for closures
impl<F> MigrationHook for F
where
    F: Fn(&MigrationEvent) + Send + Sync,
{
    fn on_event(&self, event: &MigrationEvent) {
        self(event)
    }
}
