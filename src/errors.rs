//! Typed error hierarchy for the task board.
//!
//! Four enums cover the four seams:
//! - `BoardError`: storage and API failures
//! - `StoreError`: the record-store contract used by autosave and moves
//! - `OrderingError`: fractional order-index computation
//! - `MoveError`: an optimistic move that failed locally or remotely

use thiserror::Error;

/// Errors from the board storage and HTTP layer.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Column {id} not found")]
    ColumnNotFound { id: i64 },

    #[error("Task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("Subtask {id} not found")]
    SubtaskNotFound { id: i64 },

    #[error("Page {id} not found")]
    PageNotFound { id: i64 },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProjectNotFound { .. }
                | Self::ColumnNotFound { .. }
                | Self::TaskNotFound { .. }
                | Self::SubtaskNotFound { .. }
                | Self::PageNotFound { .. }
        )
    }
}

/// Failure of a record-store call. Callers only learn that the write failed
/// and roughly why; there is no retry policy attached.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// `kind` is the record noun as shown to users, e.g. `"Task"`.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Rejected by store: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<BoardError>() {
            Some(BoardError::ProjectNotFound { id }) => Self::NotFound { kind: "Project", id: *id },
            Some(BoardError::ColumnNotFound { id }) => Self::NotFound { kind: "Column", id: *id },
            Some(BoardError::TaskNotFound { id }) => Self::NotFound { kind: "Task", id: *id },
            Some(BoardError::SubtaskNotFound { id }) => Self::NotFound { kind: "Subtask", id: *id },
            Some(BoardError::PageNotFound { id }) => Self::NotFound { kind: "Page", id: *id },
            Some(BoardError::BadRequest(msg)) => Self::Rejected(msg.clone()),
            _ => Self::Unavailable(format!("{:#}", err)),
        }
    }
}

/// Errors from the fractional order-index calculator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderingError {
    /// The midpoint of two neighbours is no longer strictly between them.
    #[error("Order index precision exhausted between {before} and {after}")]
    PrecisionExhausted { before: f64, after: f64 },

    #[error("Item {id} is not in the list")]
    UnknownItem { id: i64 },

    #[error("{kind} items cannot move between groups")]
    CrossGroupMove { kind: &'static str },
}

/// An optimistic move that was rolled back.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error(transparent)]
    Ordering(#[from] OrderingError),

    #[error("Move was rolled back: {0}")]
    Store(#[from] StoreError),
}
