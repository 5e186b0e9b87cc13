//! Transaction diagnostics surfaced to the UI collaborator.
//!
//! Failures during a running transaction never crash the network; they land
//! here as text plus an incrementing counter.

use std::sync::{Arc, Mutex, PoisonError};

/// Point-in-time copy of a component's diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Most recent error text.
    pub last_error: Option<String>,
    /// Errors recorded since the last reset.
    pub error_count: u32,
    /// Human-readable exchange log, oldest first.
    pub transcript: Vec<String>,
    /// Number of transactions that ran to completion.
    pub completed: u32,
}

/// Shared diagnostics cell.
///
/// Cloned into the protocol task so the component can expose a snapshot
/// while the task is still running.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    inner: Arc<Mutex<DiagnosticsSnapshot>>,
}

impl Diagnostics {
    /// Empty diagnostics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error and bump the counter.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(error = %message, "diagnostic error recorded");
        let mut state = self.lock();
        state.error_count = state.error_count.saturating_add(1);
        state.last_error = Some(message);
    }

    /// Reset the error counter and last error.
    pub fn reset_errors(&self) {
        let mut state = self.lock();
        state.error_count = 0;
        state.last_error = None;
    }

    /// Append a transcript line.
    pub fn log(&self, line: impl Into<String>) {
        self.lock().transcript.push(line.into());
    }

    /// Count a transaction that ran to completion.
    pub fn mark_completed(&self) {
        let mut state = self.lock();
        state.completed = state.completed.saturating_add(1);
    }

    /// Forget everything.
    pub fn clear(&self) {
        *self.lock() = DiagnosticsSnapshot::default();
    }

    /// Current state.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DiagnosticsSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_count_and_reset() {
        let diag = Diagnostics::new();
        diag.record_error("Incorrect PIN.");
        diag.record_error("Incorrect PIN.");

        let snap = diag.snapshot();
        assert_eq!(snap.error_count, 2);
        assert_eq!(snap.last_error.as_deref(), Some("Incorrect PIN."));

        diag.reset_errors();
        assert_eq!(diag.snapshot().error_count, 0);
        assert_eq!(diag.snapshot().last_error, None);
    }

    #[test]
    fn clones_share_state() {
        let diag = Diagnostics::new();
        let task_side = diag.clone();
        task_side.log(">> 00A40400");
        task_side.mark_completed();

        let snap = diag.snapshot();
        assert_eq!(snap.transcript, vec![">> 00A40400".to_string()]);
        assert_eq!(snap.completed, 1);

        diag.clear();
        assert_eq!(task_side.snapshot(), DiagnosticsSnapshot::default());
    }
}
