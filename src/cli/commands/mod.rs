pub mod auth;
pub mod registrations;
pub mod trainings;
pub mod watch;

use crate::catalog::ListOutcome;

/// Turn a failed list outcome into a command error
pub(crate) fn require<T>(outcome: ListOutcome<T>) -> anyhow::Result<Option<T>> {
    if outcome.success {
        Ok(outcome.data)
    } else {
        Err(anyhow::anyhow!(outcome.error.unwrap_or_else(|| "Operation failed".to_string())))
    }
}
