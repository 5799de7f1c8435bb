use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the event queue API and recorded against failed dispatches.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Handler disabled for event type: {0}")]
    HandlerDisabled(String),

    #[error("Handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    #[error("Handler fault: {0}")]
    HandlerFault(String),

    #[error("Permanent failure: {0}")]
    PermanentFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EventError {
    /// Whether a dispatch that ended with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventError::HandlerTimeout(_) | EventError::HandlerFault(_) | EventError::Store(_)
        )
    }
}

/// Error returned by a handler for one dispatch.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
    pub should_retry: bool,
    /// Overrides the computed backoff when set
    pub retry_after: Option<Duration>,
}

impl HandlerError {
    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            should_retry: true,
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            should_retry: false,
            retry_after: None,
        }
    }

    pub fn retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::retry(format!("{:#}", err))
    }
}

impl From<EventError> for HandlerError {
    fn from(err: EventError) -> Self {
        let retryable = err.is_retryable();
        HandlerError {
            message: err.to_string(),
            should_retry: retryable,
            retry_after: None,
        }
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::retry(err.to_string())
    }
}
