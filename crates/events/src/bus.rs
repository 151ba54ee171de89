//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] publishes [`ExecutionEvent`]s to any number of listeners,
//! e.g. a transport layer relaying them to clients or a library indexer.

use chrono::{DateTime, Utc};
use scriptd_core::scripting::status::ExecutionStatus;
use scriptd_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An execution was admitted and its log row created.
pub const EXECUTION_STARTED: &str = "execution.started";

/// An execution reached a terminal status.
pub const EXECUTION_FINISHED: &str = "execution.finished";

/// A successful run asks for its library to be re-indexed.
pub const LIBRARY_REINDEX_REQUESTED: &str = "library.reindex_requested";

// ---------------------------------------------------------------------------
// ExecutionEvent
// ---------------------------------------------------------------------------

/// A lifecycle event for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Dot-separated event name, one of the constants in this module.
    pub event_type: String,
    pub script_id: DbId,
    pub execution_id: DbId,
    /// Event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(event_type: impl Into<String>, script_id: DbId, execution_id: DbId) -> Self {
        Self {
            event_type: event_type.into(),
            script_id,
            execution_id,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn started(script_id: DbId, execution_id: DbId) -> Self {
        Self::new(EXECUTION_STARTED, script_id, execution_id)
    }

    pub fn finished(
        script_id: DbId,
        execution_id: DbId,
        status: ExecutionStatus,
        exit_code: Option<i32>,
    ) -> Self {
        Self::new(EXECUTION_FINISHED, script_id, execution_id).with_payload(serde_json::json!({
            "status": status,
            "exit_code": exit_code,
        }))
    }

    pub fn reindex_requested(script_id: DbId, execution_id: DbId, library_id: DbId) -> Self {
        Self::new(LIBRARY_REINDEX_REQUESTED, script_id, execution_id)
            .with_payload(serde_json::json!({ "library_id": library_id }))
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus, shared via `Arc<EventBus>`.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer wraps.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ExecutionEvent) {
        // Only fails when there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_event_carries_status_and_exit_code() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(ExecutionEvent::finished(4, 17, ExecutionStatus::Failed, Some(3)));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, EXECUTION_FINISHED);
        assert_eq!(received.script_id, 4);
        assert_eq!(received.execution_id, 17);
        assert_eq!(received.payload["status"], "failed");
        assert_eq!(received.payload["exit_code"], 3);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ExecutionEvent::reindex_requested(1, 2, 9));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.event_type, LIBRARY_REINDEX_REQUESTED);
        assert_eq!(e2.payload["library_id"], 9);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(ExecutionEvent::started(1, 1));
    }

    #[test]
    fn started_event_has_empty_payload() {
        let event = ExecutionEvent::started(3, 5);
        assert_eq!(event.event_type, EXECUTION_STARTED);
        assert!(event.payload.as_object().is_some_and(|o| o.is_empty()));
    }
}
