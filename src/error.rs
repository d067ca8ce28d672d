//! Typed error taxonomy for the inventory ledger.
//!
//! Every workflow returns `StoreError` so embedding layers (HTTP, IPC) can
//! translate kinds to status codes without parsing message strings. SQLite
//! lock timeouts and constraint failures surface as `Conflict`; anything
//! else from the driver passes through as `Storage`.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Application error kinds.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed or out-of-range input, rejected before any mutation.
    #[error("validation: {0}")]
    Validation(String),

    /// Unknown ingredient/product/session/lot id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The FIFO engine cannot satisfy the required quantity.
    /// Carries the shortfall so callers can display it.
    #[error(
        "insufficient stock for ingredient {ingredient_id}: required {required}, available {available}"
    )]
    InsufficientStock {
        ingredient_id: String,
        required: f64,
        available: f64,
    },

    /// State conflicts: a second open session, a lock that timed out, a
    /// unique constraint hit. Lock-timeout conflicts are safe to retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal consistency failure. Unreachable given correct callers,
    /// but checked and surfaced rather than clamped.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Any other database-level failure.
    #[error("storage: {0}")]
    Storage(rusqlite::Error),

    /// Filesystem failure preparing the database location.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, ref msg) = err {
            match e.code {
                // busy_timeout already bounded the wait; tell the caller to retry
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return StoreError::Conflict(
                        "database is busy, retry the operation".to_string(),
                    );
                }
                ErrorCode::ConstraintViolation => {
                    let detail = msg.clone().unwrap_or_else(|| "constraint violation".into());
                    return StoreError::Conflict(detail);
                }
                _ => {}
            }
        }
        StoreError::Storage(err)
    }
}

impl StoreError {
    /// Shorthand for a `NotFound` with an owned id.
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
