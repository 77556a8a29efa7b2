//! Async service around the charging station core.
//!
//! Every mutating operation runs against a draft copy of the station under a
//! single lock, is persisted through a [`StationStore`], and only then becomes
//! visible; events are published once the draft is committed.

mod clock;
mod engine;
mod error;
mod notify;
mod store;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::engine::Engine;
pub use crate::error::EngineError;
pub use crate::notify::{BroadcastNotifier, Notifier, TracingNotifier};
pub use crate::store::{JsonFileStore, MemoryStore, StationStore};
