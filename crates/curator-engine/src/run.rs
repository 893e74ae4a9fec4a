use curator_contracts::events::{BatchEvent, EventWriter};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::progress::ProgressStore;

/// Shared handles for one running batch: where progress goes, the token
/// polled between items or jobs, and the optional event log.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub progress: ProgressStore,
    pub cancel: CancellationToken,
    pub events: Option<EventWriter>,
}

impl RunContext {
    pub fn new(progress: ProgressStore, cancel: CancellationToken, events: Option<EventWriter>) -> Self {
        Self {
            progress,
            cancel,
            events,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Appends to the event log. A failed append is logged and otherwise ignored.
    pub fn emit(&self, event: BatchEvent) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(&event) {
            warn!(path = %events.path().display(), error = %err, "event log append failed");
        }
    }
}

/// Tally of one batch as seen by the engine that ran it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }
}
