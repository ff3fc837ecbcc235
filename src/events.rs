//! Event bus — publish/subscribe channels decoupling job progress from
//! any consumer.
//!
//! One broadcast channel per event kind. Emission is fire-and-forget: a
//! send with no live subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dispatch::Mode;
use crate::queue::JobKind;

/// Terminal payload published on the result channel.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub mode: Mode,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Per-kind broadcast channels. Cheap to clone; all clones share the
/// same subscribers.
#[derive(Clone)]
pub struct EventBus {
    log: broadcast::Sender<String>,
    status: broadcast::Sender<String>,
    result: broadcast::Sender<JobOutcome>,
    error: broadcast::Sender<String>,
    mode: broadcast::Sender<Mode>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (log, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        let (result, _) = broadcast::channel(capacity);
        let (error, _) = broadcast::channel(capacity);
        let (mode, _) = broadcast::channel(capacity);
        Self {
            log,
            status,
            result,
            error,
            mode,
        }
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<String> {
        self.log.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status.subscribe()
    }

    pub fn subscribe_result(&self) -> broadcast::Receiver<JobOutcome> {
        self.result.subscribe()
    }

    pub fn subscribe_error(&self) -> broadcast::Receiver<String> {
        self.error.subscribe()
    }

    pub fn subscribe_mode(&self) -> broadcast::Receiver<Mode> {
        self.mode.subscribe()
    }

    pub fn emit_log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%message, "log event");
        let _ = self.log.send(message);
    }

    pub fn emit_status(&self, message: impl Into<String>) {
        let _ = self.status.send(message.into());
    }

    pub fn emit_result(&self, outcome: JobOutcome) {
        tracing::debug!(job_id = %outcome.job_id, "result event");
        let _ = self.result.send(outcome);
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "error event");
        let _ = self.error.send(message);
    }

    pub fn emit_mode_changed(&self, mode: Mode) {
        let _ = self.mode.send(mode);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
