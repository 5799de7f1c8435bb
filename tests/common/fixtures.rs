//! Fixtures shared by the end-to-end tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pezzottify_event_queue::config::EventQueueSettings;
use pezzottify_event_queue::events::{
    EmitOptions, EventHandler, EventRecord, EventSystem, FileExpiredPayload, HandlerContext,
    HandlerError, HandlerRegistry, ManualClock, SqliteEventStore,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Fixed starting instant for every manual clock.
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

pub fn expired_payload(file_id: &str) -> FileExpiredPayload {
    FileExpiredPayload {
        file_id: file_id.to_string(),
        user_id: "user-1".to_string(),
        file_name: format!("{}.bin", file_id),
        file_path: format!("/tmp/{}.bin", file_id),
        size: 42,
    }
}

/// An event system backed by a temporary database file.
pub struct TestSystem {
    pub system: EventSystem,
    pub store: Arc<SqliteEventStore>,
    pub clock: Arc<ManualClock>,
    pub dir: TempDir,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_settings(EventQueueSettings {
            poll_jitter_ms: 0,
            ..Default::default()
        })
    }

    pub fn with_settings(settings: EventQueueSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteEventStore::new(dir.path().join("events.db")).unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let system = EventSystem::new(
            store.clone(),
            Arc::new(HandlerRegistry::new()),
            clock.clone(),
            settings,
        );
        Self {
            system,
            store,
            clock,
            dir,
        }
    }

    pub fn emit_expired(&self, file_id: &str, priority: i32) -> EventRecord {
        self.system
            .emit(
                &expired_payload(file_id),
                EmitOptions::default().with_priority(priority),
            )
            .unwrap()
    }

    pub fn reload(&self, record: &EventRecord) -> EventRecord {
        self.system.get(&record.id).unwrap()
    }
}

/// A `file.expired` handler that fails a scripted number of times and records
/// the file id of every delivery it sees.
pub struct ScriptedHandler {
    fail_first: usize,
    permanent: bool,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHandler {
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            permanent: false,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn permanently_failing() -> Self {
        Self {
            permanent: true,
            ..Self::always_failing()
        }
    }

    /// Shared view of the deliveries, in call order.
    pub fn seen(&self) -> Arc<Mutex<Vec<String>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    type Payload = FileExpiredPayload;

    async fn handle(
        &self,
        payload: FileExpiredPayload,
        _record: &EventRecord,
        _ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(payload.file_id.clone());
            seen.len() - 1
        };
        if call < self.fail_first {
            let message = format!("scripted failure #{}", call + 1);
            if self.permanent {
                return Err(HandlerError::permanent(message));
            }
            return Err(HandlerError::retry(message));
        }
        Ok(())
    }
}
