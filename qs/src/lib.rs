//! QuantStore - persistent run state for the QuantumLayer engine
//!
//! A deliberately small document store on SQLite. Each collection is one
//! table with a JSON payload column plus the handful of columns the engine
//! filters on (status, parent id). Schema changes are applied as monotone,
//! append-only migrations; nothing is ever dropped.
//!
//! # Collections
//!
//! - [`Collection::Intents`] - one row per orchestration run
//! - [`Collection::Tasks`] - decomposed tasks, parented to an intent
//! - [`Collection::ValidationResults`] - per-task validation verdicts
//! - [`Collection::Capsules`] - assembled capsule metadata

mod store;

pub use store::{Collection, Document, Store};

/// Current Unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
