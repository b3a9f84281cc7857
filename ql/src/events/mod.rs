//! Lifecycle events: envelope types, the pub/sub bus, and the JSONL sink

pub mod bus;
pub mod logger;
pub mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{read_event_log, spawn_event_logger};
pub use types::{Event, EventKind};
