//! Durable, typed event queue.
//!
//! Events are persisted by the [`Emitter`], claimed atomically by the [`Worker`]
//! loop and dispatched to the handler registered for their type in the
//! [`HandlerRegistry`]. [`EventSystem`] wires these together.

mod clock;
mod context;
mod emitter;
mod error;
mod handler;
mod lifecycle;
mod models;
mod registry;
mod retry_policy;
mod schema;
mod store;
mod types;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::HandlerContext;
pub use emitter::Emitter;
pub use error::{EventError, HandlerError};
pub use handler::{ErasedHandler, EventHandler, HandlerOptions};
pub use lifecycle::EventSystem;
pub use models::{
    EmitOptions, EventFilter, EventRecord, EventStats, EventStatus, DEFAULT_MAX_RETRIES,
};
pub use registry::{HandlerRegistry, Registration};
pub use retry_policy::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use store::{EventStore, SqliteEventStore};
pub use types::{
    decode_payload, EventPayload, EventType, FileExpiredPayload, FileScheduleExpirationPayload,
};
pub use worker::Worker;
