//! Processing status shared between the orchestrator and observers.
//!
//! The [`crate::extractor::Extractor`] is the only writer; a status line or
//! the CLI may read it at any time through a cloned [`StatusManager`].

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Where the orchestrator is in its run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Idle,
    Processing,
    Canceling,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Idle => f.write_str("idle"),
            ProcessingStatus::Processing => f.write_str("processing"),
            ProcessingStatus::Canceling => f.write_str("canceling"),
        }
    }
}

/// Thread-safe cell holding the current [`ProcessingStatus`].
///
/// Transitions: `idle → processing` ([`begin`](Self::begin)),
/// `processing → canceling` ([`request_cancel`](Self::request_cancel)),
/// `processing | canceling → idle` ([`finish`](Self::finish)).
#[derive(Debug, Clone, Default)]
pub struct StatusManager {
    inner: Arc<Mutex<ProcessingStatus>>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProcessingStatus> {
        // The status is a plain Copy value; a poisoned lock still holds a
        // valid one.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self) -> ProcessingStatus {
        *self.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.get() == ProcessingStatus::Idle
    }

    pub fn is_canceling(&self) -> bool {
        self.get() == ProcessingStatus::Canceling
    }

    /// `idle → processing`. Returns false (and changes nothing) from any
    /// other state.
    pub fn begin(&self) -> bool {
        let mut status = self.lock();
        if *status != ProcessingStatus::Idle {
            return false;
        }
        *status = ProcessingStatus::Processing;
        true
    }

    /// `processing → canceling`. Returns false from any other state.
    pub fn request_cancel(&self) -> bool {
        let mut status = self.lock();
        if *status != ProcessingStatus::Processing {
            return false;
        }
        *status = ProcessingStatus::Canceling;
        true
    }

    /// Back to idle, whatever the run outcome.
    pub fn finish(&self) {
        *self.lock() = ProcessingStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let s = StatusManager::new();
        assert!(s.is_idle());
        assert!(!s.request_cancel());

        assert!(s.begin());
        assert_eq!(s.get(), ProcessingStatus::Processing);
        assert!(!s.begin(), "second run must not start");

        assert!(s.request_cancel());
        assert!(s.is_canceling());
        assert!(!s.request_cancel());

        s.finish();
        assert!(s.is_idle());
    }

    #[test]
    fn clones_share_state() {
        let writer = StatusManager::new();
        let observer = writer.clone();
        writer.begin();
        assert_eq!(observer.get(), ProcessingStatus::Processing);
        assert_eq!(observer.get().to_string(), "processing");
    }
}
