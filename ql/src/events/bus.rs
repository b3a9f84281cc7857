//! Event bus - central pub/sub channel for pipeline events
//!
//! Built on tokio broadcast channels: publication never blocks the
//! producer, each subscriber has a bounded buffer, and when a subscriber
//! falls behind the oldest events are dropped (the subscriber observes a
//! single lag notification it can turn into a `bus.dropped` diagnostic).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Event, EventKind};

/// Default per-subscriber buffer capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Central event bus for one engine process
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a bus with the default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Publish an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and a
    /// full subscriber buffer drops that subscriber's oldest events.
    pub fn publish(&self, event: Event) {
        debug!(event_type = event.type_str(), source = %event.source, "EventBus::publish");
        let _ = self.tx.send(event);
    }

    /// Subscribe; only events published after this call are received
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to a source component name
    pub fn emitter_for(&self, source: impl Into<String>) -> EventEmitter {
        let source = source.into();
        debug!(%source, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            source,
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to publish events without owning the bus
///
/// Cheap to clone; stamps every event with the component's source name.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
    source: String,
}

impl EventEmitter {
    /// The source name this emitter is bound to
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publish a kind wrapped in a fresh envelope
    pub fn emit(&self, kind: EventKind) {
        debug!(event_type = kind.type_str(), source = %self.source, "EventEmitter::emit");
        let _ = self.tx.send(Event::new(self.source.clone(), kind));
    }

    // === Convenience methods ===

    pub fn task_started(&self, task_id: &str, agent_id: &str) {
        self.emit(EventKind::TaskStarted {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn task_completed(
        &self,
        task_id: &str,
        agent_id: &str,
        output_size: usize,
        duration_ms: u64,
        sandbox_success: bool,
        security_score: u8,
        execution_time_ms: u64,
        validation_score: u8,
        validation_passed: bool,
    ) {
        self.emit(EventKind::TaskCompleted {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            output_size,
            duration_ms,
            sandbox_success,
            security_score,
            execution_time_ms,
            validation_score,
            validation_passed,
        });
    }

    pub fn task_failed(&self, task_id: &str, error_kind: &str, message: &str, retryable: bool) {
        self.emit(EventKind::TaskFailed {
            task_id: task_id.to_string(),
            error_kind: error_kind.to_string(),
            message: message.to_string(),
            retryable,
        });
    }

    pub fn task_skipped(&self, task_id: &str, skip_cause: &str) {
        self.emit(EventKind::TaskSkipped {
            task_id: task_id.to_string(),
            skip_cause: skip_cause.to_string(),
        });
    }

    pub fn workflow_started(&self, intent_id: &str, task_count: usize) {
        self.emit(EventKind::WorkflowStarted {
            intent_id: intent_id.to_string(),
            task_count,
        });
    }

    pub fn workflow_completed(&self, intent_id: &str, overall_score: u8, execution_time_ms: u64) {
        self.emit(EventKind::WorkflowCompleted {
            intent_id: intent_id.to_string(),
            overall_score,
            execution_time_ms,
        });
    }

    pub fn workflow_failed(&self, intent_id: &str, error: &str, failed_tasks: Vec<String>) {
        self.emit(EventKind::WorkflowFailed {
            intent_id: intent_id.to_string(),
            error: error.to_string(),
            failed_tasks,
        });
    }

    pub fn workflow_cancelled(&self, intent_id: &str) {
        self.emit(EventKind::WorkflowCancelled {
            intent_id: intent_id.to_string(),
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_bus_creation() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(Event::new(
            "test",
            EventKind::WorkflowStarted {
                intent_id: "QLI-1".to_string(),
                task_count: 3,
            },
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.type_str(), "workflow.started");
        assert_eq!(event.source, "test");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(16);
        bus.publish(Event::new("test", EventKind::BusDropped { missed: 1 }));
    }

    #[tokio::test]
    async fn test_emitter_stamps_source() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("agent:DEV-AGT-120000-001");

        emitter.task_started("QL-DEV-20250101-001", "DEV-AGT-120000-001");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, "agent:DEV-AGT-120000-001");
        assert_eq!(event.kind.task_id(), Some("QL-DEV-20250101-001"));
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("executor");

        emitter.task_started("t1", "a1");
        emitter.task_completed("t1", "a1", 10, 5, true, 100, 3, 90, true);
        emitter.task_skipped("t2", "t1");

        let types: Vec<&str> = [
            rx.recv().await.unwrap().type_str(),
            rx.recv().await.unwrap().type_str(),
            rx.recv().await.unwrap().type_str(),
        ]
        .to_vec();
        assert_eq!(types, vec!["task.started", "task.completed", "task.skipped"]);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emitter_for("x").workflow_cancelled("QLI-9");

        assert_eq!(rx1.recv().await.unwrap().type_str(), "workflow.cancelled");
        assert_eq!(rx2.recv().await.unwrap().type_str(), "workflow.cancelled");
    }

    #[tokio::test]
    async fn test_lagged_subscriber_drops_oldest() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("flood");

        for i in 0..10 {
            emitter.task_started(&format!("t{}", i), "a");
        }

        match rx.recv().await {
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                assert!(n > 0, "should report dropped events");
                // Subsequent receives still work
                assert_eq!(rx.recv().await.unwrap().type_str(), "task.started");
            }
            Ok(event) => assert_eq!(event.type_str(), "task.started"),
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
}
