use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::errors::DomainError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Acquire the connection lock, recovering from a poisoned mutex.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Apply WAL, relaxed sync, busy timeout and foreign key enforcement.
pub fn configure_connection(conn: &Connection) -> Result<(), DomainError> {
    // journal_mode returns a row, so it cannot go through execute_batch.
    // In-memory databases report "memory" and that is fine.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");

    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|error| storage_error("configure synchronous", error))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|error| storage_error("enable foreign keys", error))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|error| storage_error("configure busy timeout", error))?;

    Ok(())
}

pub fn storage_error(context: &str, error: impl std::fmt::Display) -> DomainError {
    DomainError::Storage(format!("Failed to {}: {}", context, error))
}
