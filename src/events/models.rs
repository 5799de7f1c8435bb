//! Data models for the event queue.
//!
//! Defines event records, statuses, emit options, stats and filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::types::EventType;

/// Default ceiling on failed attempts for a freshly emitted event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Status of an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Scheduled,
    Processing,
    Completed, // terminal
    Failed,    // terminal
}

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        EventStatus::Pending,
        EventStatus::Scheduled,
        EventStatus::Processing,
        EventStatus::Completed,
        EventStatus::Failed,
    ];

    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }

    /// Returns true if the record is waiting to be claimed.
    pub fn is_queued(&self) -> bool {
        matches!(self, EventStatus::Pending | EventStatus::Scheduled)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Scheduled => "SCHEDULED",
            EventStatus::Processing => "PROCESSING",
            EventStatus::Completed => "COMPLETED",
            EventStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(EventStatus::Pending),
            "SCHEDULED" => Some(EventStatus::Scheduled),
            "PROCESSING" => Some(EventStatus::Processing),
            "COMPLETED" => Some(EventStatus::Completed),
            "FAILED" => Some(EventStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A durable unit of deferred work.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    /// Unique identifier (UUID)
    pub id: String,
    /// Key into the closed type map, decides the payload shape
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Payload, opaque to the queue
    pub payload: JsonValue,
    /// Current status in the state machine
    pub status: EventStatus,
    /// Higher value = served first
    pub priority: i32,
    /// Not eligible before this instant. `None` means eligible since creation.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the latest attempt was claimed
    pub started_at: Option<DateTime<Utc>>,
    /// Set on completion
    pub processed_at: Option<DateTime<Utc>>,
    /// Set on permanent failure
    pub failed_at: Option<DateTime<Utc>>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Ceiling for `retry_count`
    pub max_retries: u32,
    /// Last failure message
    pub error: Option<String>,
    /// Free-form diagnostic bag
    pub metadata: JsonValue,
}

impl EventRecord {
    /// Create a new record as the emitter would, before persistence.
    pub fn new(
        id: String,
        event_type: EventType,
        payload: JsonValue,
        options: &EmitOptions,
        default_max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let status = match options.scheduled_at {
            Some(at) if at > now => EventStatus::Scheduled,
            _ => EventStatus::Pending,
        };
        Self {
            id,
            event_type,
            payload,
            status,
            priority: options.priority,
            scheduled_at: options.scheduled_at,
            created_at: now,
            updated_at: now,
            started_at: None,
            processed_at: None,
            failed_at: None,
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(default_max_retries),
            error: None,
            metadata: options
                .metadata
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
        }
    }

    /// The instant from which the record may be claimed.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.created_at)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at() <= now
    }

    /// Whether another failed attempt would still leave room for a retry.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }
}

/// Options accepted by `emit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmitOptions {
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

impl EmitOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub pending: u64,
    pub scheduled: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl EventStats {
    pub fn total(&self) -> u64 {
        self.pending + self.scheduled + self.processing + self.completed + self.failed
    }

    pub(crate) fn add(&mut self, status: EventStatus, count: u64) {
        match status {
            EventStatus::Pending => self.pending += count,
            EventStatus::Scheduled => self.scheduled += count,
            EventStatus::Processing => self.processing += count,
            EventStatus::Completed => self.completed += count,
            EventStatus::Failed => self.failed += count,
        }
    }
}

/// Inspection filter for listing records. All fields are optional and combined with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    #[serde(rename = "type")]
    pub event_type: Option<EventType>,
    pub status: Option<EventStatus>,
    pub priority: Option<i32>,
    pub scheduled_before: Option<DateTime<Utc>>,
    pub scheduled_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EventFilter {
    pub const DEFAULT_LIMIT: usize = 100;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn record_with(options: &EmitOptions, now: DateTime<Utc>) -> EventRecord {
        EventRecord::new(
            "id-1".to_string(),
            EventType::FileExpired,
            json!({}),
            options,
            DEFAULT_MAX_RETRIES,
            now,
        )
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::Scheduled.is_terminal());
        assert!(!EventStatus::Processing.is_terminal());
        assert!(EventStatus::Completed.is_terminal());
        assert!(EventStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_db_conversion() {
        for status in EventStatus::ALL {
            assert_eq!(EventStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(EventStatus::from_db_str("RETRY_WAITING"), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&EventStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }

    #[test]
    fn test_new_record_defaults() {
        let now = Utc::now();
        let record = record_with(&EmitOptions::default(), now);

        assert_eq!(record.status, EventStatus::Pending);
        assert_eq!(record.priority, 0);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.max_retries, 3);
        assert!(record.scheduled_at.is_none());
        assert_eq!(record.metadata, json!({}));
        assert!(record.is_due(now));
    }

    #[test]
    fn test_future_schedule_yields_scheduled_status() {
        let now = Utc::now();
        let options = EmitOptions::default().scheduled_at(now + Duration::hours(1));
        let record = record_with(&options, now);

        assert_eq!(record.status, EventStatus::Scheduled);
        assert!(!record.is_due(now));
        assert!(record.is_due(now + Duration::hours(1)));
    }

    #[test]
    fn test_past_schedule_yields_pending_status() {
        let now = Utc::now();
        let options = EmitOptions::default().scheduled_at(now - Duration::minutes(5));
        assert_eq!(record_with(&options, now).status, EventStatus::Pending);
    }

    #[test]
    fn test_has_retries_left() {
        let now = Utc::now();
        let mut record = record_with(&EmitOptions::default().with_max_retries(3), now);
        assert!(record.has_retries_left());
        record.retry_count = 1;
        assert!(record.has_retries_left());
        record.retry_count = 2;
        assert!(!record.has_retries_left());
    }

    #[test]
    fn test_stats_total() {
        let mut stats = EventStats::default();
        stats.add(EventStatus::Pending, 2);
        stats.add(EventStatus::Failed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 3);
    }
}
