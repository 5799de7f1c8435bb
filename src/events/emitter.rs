//! Creates event records from typed or raw requests.
//!
//! Emitting only validates and persists. No handler runs synchronously.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use super::clock::Clock;
use super::error::EventError;
use super::models::{EmitOptions, EventRecord};
use super::store::EventStore;
use super::types::{EventPayload, EventType};
use crate::server::metrics;

#[derive(Clone)]
pub struct Emitter {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    default_max_retries: u32,
}

impl Emitter {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, default_max_retries: u32) -> Self {
        Self {
            store,
            clock,
            default_max_retries,
        }
    }

    /// Emit a typed payload. The event type comes from the payload type.
    pub fn emit<P: EventPayload>(
        &self,
        payload: &P,
        options: EmitOptions,
    ) -> Result<EventRecord, EventError> {
        payload.validate()?;
        let value = serde_json::to_value(payload).map_err(|e| EventError::InvalidPayload {
            event_type: P::EVENT_TYPE.as_str().to_string(),
            reason: e.to_string(),
        })?;
        self.persist(P::EVENT_TYPE, value, options)
    }

    /// Emit a raw JSON payload for a type given by name, checking the payload
    /// shape before anything is persisted.
    pub fn emit_json(
        &self,
        type_name: &str,
        payload: JsonValue,
        options: EmitOptions,
    ) -> Result<EventRecord, EventError> {
        let event_type: EventType = type_name.parse()?;
        event_type.validate_payload(&payload)?;
        self.persist(event_type, payload, options)
    }

    /// Create a fresh PENDING record from an existing one. The source record is untouched.
    pub fn reemit(&self, id: &str) -> Result<EventRecord, EventError> {
        let source = self
            .store
            .get(id)?
            .ok_or_else(|| EventError::NotFound(id.to_string()))?;

        let options = EmitOptions {
            priority: source.priority,
            scheduled_at: None,
            max_retries: Some(source.max_retries),
            metadata: Some(source.metadata.clone()),
        };
        let record = self.persist(source.event_type, source.payload, options)?;
        info!(
            "Re-emitted event {} ({}) as {}",
            id, record.event_type, record.id
        );
        Ok(record)
    }

    fn persist(
        &self,
        event_type: EventType,
        payload: JsonValue,
        mut options: EmitOptions,
    ) -> Result<EventRecord, EventError> {
        // The store keeps millisecond precision
        let now = self.clock.now().trunc_subsecs(3);
        options.scheduled_at = options.scheduled_at.map(|at: DateTime<Utc>| at.trunc_subsecs(3));
        if let Some(metadata) = &options.metadata {
            if !metadata.is_object() {
                return Err(EventError::InvalidPayload {
                    event_type: event_type.as_str().to_string(),
                    reason: "metadata must be a JSON object".to_string(),
                });
            }
        }

        let record = EventRecord::new(
            uuid::Uuid::new_v4().to_string(),
            event_type,
            payload,
            &options,
            self.default_max_retries,
            now,
        );
        self.store.insert(&record)?;
        metrics::record_event_emitted(event_type.as_str());
        debug!(
            "Emitted event {} ({}) as {} with priority {}",
            record.id, event_type, record.status, record.priority
        );
        Ok(record)
    }
}
