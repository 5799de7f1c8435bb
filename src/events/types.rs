//! The closed set of event types and the payload shape bound to each.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::error::EventError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "file.schedule-expiration")]
    FileScheduleExpiration,
    #[serde(rename = "file.expired")]
    FileExpired,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::FileScheduleExpiration, EventType::FileExpired];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FileScheduleExpiration => "file.schedule-expiration",
            EventType::FileExpired => "file.expired",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Check that `payload` has the shape bound to this type.
    pub fn validate_payload(&self, payload: &JsonValue) -> Result<(), EventError> {
        match self {
            EventType::FileScheduleExpiration => {
                decode_payload::<FileScheduleExpirationPayload>(payload)?.validate()
            }
            EventType::FileExpired => decode_payload::<FileExpiredPayload>(payload)?.validate(),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| EventError::UnknownType(s.to_string()))
    }
}

/// A payload bound to exactly one event type.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const EVENT_TYPE: EventType;

    /// Field-level checks beyond what deserialization enforces.
    fn validate(&self) -> Result<(), EventError> {
        Ok(())
    }
}

/// Decode a raw payload into `P`, mapping failures to `InvalidPayload`.
pub fn decode_payload<P: EventPayload>(payload: &JsonValue) -> Result<P, EventError> {
    P::deserialize(payload).map_err(|e| EventError::InvalidPayload {
        event_type: P::EVENT_TYPE.as_str().to_string(),
        reason: e.to_string(),
    })
}

fn require_non_empty(event_type: EventType, field: &str, value: &str) -> Result<(), EventError> {
    if value.trim().is_empty() {
        return Err(EventError::InvalidPayload {
            event_type: event_type.as_str().to_string(),
            reason: format!("{} must not be empty", field),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileScheduleExpirationPayload {
    pub file_id: String,
    pub user_id: String,
    pub file_name: String,
    pub expires_at: DateTime<Utc>,
}

impl EventPayload for FileScheduleExpirationPayload {
    const EVENT_TYPE: EventType = EventType::FileScheduleExpiration;

    fn validate(&self) -> Result<(), EventError> {
        require_non_empty(Self::EVENT_TYPE, "fileId", &self.file_id)?;
        require_non_empty(Self::EVENT_TYPE, "userId", &self.user_id)?;
        require_non_empty(Self::EVENT_TYPE, "fileName", &self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileExpiredPayload {
    pub file_id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_path: String,
    /// Size in bytes at the time the expiration was scheduled
    pub size: u64,
}

impl EventPayload for FileExpiredPayload {
    const EVENT_TYPE: EventType = EventType::FileExpired;

    fn validate(&self) -> Result<(), EventError> {
        require_non_empty(Self::EVENT_TYPE, "fileId", &self.file_id)?;
        require_non_empty(Self::EVENT_TYPE, "filePath", &self.file_path)
    }
}
