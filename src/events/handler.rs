use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::context::HandlerContext;
use super::error::HandlerError;
use super::models::EventRecord;
use super::types::{decode_payload, EventPayload, EventType};

/// Per-type dispatch options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Disabled types stay queued and untouched
    pub enabled: bool,
    /// In-flight cap for this type, on top of the global one
    pub max_concurrency: Option<usize>,
    /// Seed for the retry backoff
    pub retry_delay: Option<Duration>,
    /// Dispatch timeout, falls back to the configured default
    pub timeout: Option<Duration>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: None,
            retry_delay: None,
            timeout: None,
        }
    }
}

impl HandlerOptions {
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Trait for event handlers.
///
/// A handler declares its payload type, which binds it to exactly one event type.
/// Dispatches run as tokio tasks; a panic is caught and treated as a retryable fault.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Payload: EventPayload;

    /// Handle one event.
    ///
    /// Return `HandlerError::permanent` when retrying cannot help.
    async fn handle(
        &self,
        payload: Self::Payload,
        record: &EventRecord,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError>;
}

/// Object-safe view of a handler, with payload decoding folded in.
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    fn event_type(&self) -> EventType;

    async fn dispatch(&self, record: &EventRecord, ctx: &HandlerContext) -> Result<(), HandlerError>;
}

struct TypedHandler<H>(H);

#[async_trait]
impl<H: EventHandler> ErasedHandler for TypedHandler<H> {
    fn event_type(&self) -> EventType {
        H::Payload::EVENT_TYPE
    }

    async fn dispatch(&self, record: &EventRecord, ctx: &HandlerContext) -> Result<(), HandlerError> {
        // A payload that does not decode will never decode
        let payload = decode_payload::<H::Payload>(&record.payload)
            .map_err(|e| HandlerError::permanent(e.to_string()))?;
        self.0.handle(payload, record, ctx).await
    }
}

pub(crate) fn erase<H: EventHandler>(handler: H) -> Arc<dyn ErasedHandler> {
    Arc::new(TypedHandler(handler))
}
