//! Event record storage and persistence.
//!
//! Provides SQLite-backed storage for event records. Every state transition is a
//! single conditional UPDATE, so two workers sharing a database never claim the
//! same record.

use super::models::*;
use super::schema::EVENTS_VERSIONED_SCHEMAS;
use super::types::EventType;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Trait for event record storage operations.
pub trait EventStore: Send + Sync {
    // === Creation and lookup ===

    /// Persist a new record.
    fn insert(&self, record: &EventRecord) -> Result<()>;

    /// Get a record by ID.
    fn get(&self, id: &str) -> Result<Option<EventRecord>>;

    /// List records matching `filter`, newest first.
    fn list(&self, filter: &EventFilter) -> Result<Vec<EventRecord>>;

    /// Count records per status.
    fn stats(&self) -> Result<EventStats>;

    /// Count due, queued records per raw type name, including types that have no
    /// capacity in the current cycle.
    fn due_counts_by_type(
        &self,
        now: DateTime<Utc>,
        include_scheduled: bool,
    ) -> Result<Vec<(String, u64)>>;

    // === State transitions (atomic) ===

    /// Atomically move up to `limit` due records to PROCESSING.
    ///
    /// Only types present in `capacities` are considered, and no more than the
    /// type's capacity is claimed for each. Returned records are ordered by
    /// priority DESC, then due time ASC.
    fn claim_due_batch(
        &self,
        capacities: &HashMap<EventType, usize>,
        limit: usize,
        include_scheduled: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>>;

    /// PROCESSING → COMPLETED. Returns false if the record was not PROCESSING.
    fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// PROCESSING → PENDING with a new retry count and due time.
    fn mark_retry(
        &self,
        id: &str,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// PROCESSING → FAILED.
    fn mark_failed(&self, id: &str, retry_count: u32, error: &str, now: DateTime<Utc>)
        -> Result<bool>;

    /// PROCESSING → PENDING without counting an attempt.
    fn release_claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Return records claimed before `claimed_before` and never finished to PENDING.
    /// Returns the number of records recovered.
    fn recover_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize>;
}

/// SQLite implementation of EventStore.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// Open or create the events database at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let is_new = !db_path.as_ref().exists();
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open events database {:?}", db_path.as_ref()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        open_versioned(&conn, EVENTS_VERSIONED_SCHEMAS, is_new)
            .context("Events database schema check failed")?;
        if is_new {
            info!("Created new events database at {:?}", db_path.as_ref());
        }

        Ok(SqliteEventStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, EVENTS_VERSIONED_SCHEMAS, true)?;

        Ok(SqliteEventStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<EventRecord> {
        let event_type: String = row.get("event_type")?;
        let status: String = row.get("status")?;
        let payload: String = row.get("payload")?;
        let metadata: String = row.get("metadata")?;

        Ok(EventRecord {
            id: row.get("id")?,
            event_type: EventType::from_name(&event_type)
                .ok_or_else(|| conversion_error(format!("unknown event type '{}'", event_type)))?,
            payload: serde_json::from_str(&payload).map_err(|e| conversion_error(e.to_string()))?,
            status: EventStatus::from_db_str(&status)
                .ok_or_else(|| conversion_error(format!("unknown status '{}'", status)))?,
            priority: row.get("priority")?,
            scheduled_at: opt_millis(row.get("scheduled_at")?)?,
            created_at: millis_to_datetime(row.get("created_at")?)?,
            updated_at: millis_to_datetime(row.get("updated_at")?)?,
            started_at: opt_millis(row.get("started_at")?)?,
            processed_at: opt_millis(row.get("processed_at")?)?,
            failed_at: opt_millis(row.get("failed_at")?)?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            error: row.get("error")?,
            metadata: serde_json::from_str(&metadata)
                .map_err(|e| conversion_error(e.to_string()))?,
        })
    }

    fn queued_status_clause(include_scheduled: bool) -> &'static str {
        if include_scheduled {
            "status IN ('PENDING', 'SCHEDULED')"
        } else {
            "status = 'PENDING'"
        }
    }
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

fn millis_to_datetime(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(format!("timestamp {} out of range", ms)))
}

fn opt_millis(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(millis_to_datetime).transpose()
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

impl EventStore for SqliteEventStore {
    fn insert(&self, record: &EventRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO events (
                id, event_type, payload, status, priority, scheduled_at,
                created_at, updated_at, started_at, processed_at, failed_at,
                retry_count, max_retries, error, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                record.id,
                record.event_type.as_str(),
                serde_json::to_string(&record.payload)?,
                record.status.as_db_str(),
                record.priority,
                record.scheduled_at.map(to_millis),
                to_millis(record.created_at),
                to_millis(record.updated_at),
                record.started_at.map(to_millis),
                record.processed_at.map(to_millis),
                record.failed_at.map(to_millis),
                record.retry_count,
                record.max_retries,
                record.error,
                serde_json::to_string(&record.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<EventRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT * FROM events WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(event_type) = filter.event_type {
            clauses.push("event_type = ?");
            values.push(Box::new(event_type.as_str().to_string()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Box::new(status.as_db_str().to_string()));
        }
        if let Some(priority) = filter.priority {
            clauses.push("priority = ?");
            values.push(Box::new(priority));
        }
        if let Some(before) = filter.scheduled_before {
            clauses.push("scheduled_at < ?");
            values.push(Box::new(to_millis(before)));
        }
        if let Some(after) = filter.scheduled_after {
            clauses.push("scheduled_at > ?");
            values.push(Box::new(to_millis(after)));
        }
        if let Some(before) = filter.created_before {
            clauses.push("created_at < ?");
            values.push(Box::new(to_millis(before)));
        }
        if let Some(after) = filter.created_after {
            clauses.push("created_at > ?");
            values.push(Box::new(to_millis(after)));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT * FROM events {} ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
            where_clause
        );
        values.push(Box::new(
            filter.limit.unwrap_or(EventFilter::DEFAULT_LIMIT) as i64,
        ));
        values.push(Box::new(filter.offset.unwrap_or(0) as i64));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let mut records = Vec::new();
        for row in stmt.query_map(params_refs.as_slice(), Self::row_to_record)? {
            match row {
                Ok(record) => records.push(record),
                // e.g. a type written by a newer binary sharing the database
                Err(e @ rusqlite::Error::FromSqlConversionFailure(..)) => {
                    warn!("Skipping unreadable event record: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }

    fn stats(&self) -> Result<EventStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM events GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = EventStats::default();
        for (status, count) in rows {
            if let Some(status) = EventStatus::from_db_str(&status) {
                stats.add(status, count as u64);
            }
        }
        Ok(stats)
    }

    fn due_counts_by_type(
        &self,
        now: DateTime<Utc>,
        include_scheduled: bool,
    ) -> Result<Vec<(String, u64)>> {
        let sql = format!(
            r#"SELECT event_type, COUNT(*) FROM events
               WHERE {} AND COALESCE(scheduled_at, created_at) <= ?1
               GROUP BY event_type
               ORDER BY event_type"#,
            Self::queued_status_clause(include_scheduled)
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let counts = stmt
            .query_map(params![to_millis(now)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    fn claim_due_batch(
        &self,
        capacities: &HashMap<EventType, usize>,
        limit: usize,
        include_scheduled: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        let capacities: serde_json::Map<String, serde_json::Value> = capacities
            .iter()
            .filter(|(_, capacity)| **capacity > 0)
            .map(|(event_type, capacity)| (event_type.as_str().to_string(), (*capacity).into()))
            .collect();
        if capacities.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // Rank due records within their type so no type exceeds its capacity,
        // then take the best `limit` across all types. The single UPDATE is the
        // claim, so concurrent claimers serialize on the database write lock.
        let sql = format!(
            r#"WITH capacities(event_type, capacity) AS (
                   SELECT key, value FROM json_each(?1)
               )
               UPDATE events
               SET status = 'PROCESSING', started_at = ?2, updated_at = ?2
               WHERE id IN (
                   SELECT id FROM (
                       SELECT e.id AS id,
                              e.priority AS priority,
                              COALESCE(e.scheduled_at, e.created_at) AS due_at,
                              e.created_at AS created_at,
                              ROW_NUMBER() OVER (
                                  PARTITION BY e.event_type
                                  ORDER BY e.priority DESC,
                                           COALESCE(e.scheduled_at, e.created_at) ASC,
                                           e.created_at ASC
                              ) AS type_rank,
                              c.capacity AS capacity
                       FROM events e
                       JOIN capacities c ON c.event_type = e.event_type
                       WHERE e.{} AND COALESCE(e.scheduled_at, e.created_at) <= ?2
                   )
                   WHERE type_rank <= capacity
                   ORDER BY priority DESC, due_at ASC, created_at ASC
                   LIMIT ?3
               )
               RETURNING *"#,
            Self::queued_status_clause(include_scheduled)
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut claimed = stmt
            .query_map(
                params![
                    serde_json::Value::Object(capacities).to_string(),
                    to_millis(now),
                    limit as i64
                ],
                Self::row_to_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // RETURNING does not guarantee order
        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.due_at().cmp(&b.due_at()))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(claimed)
    }

    fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE events
               SET status = 'COMPLETED', processed_at = ?2, updated_at = ?2, error = NULL
               WHERE id = ?1 AND status = 'PROCESSING'"#,
            params![id, to_millis(now)],
        )?;
        Ok(updated > 0)
    }

    fn mark_retry(
        &self,
        id: &str,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE events
               SET status = 'PENDING', retry_count = ?2, scheduled_at = ?3,
                   error = ?4, updated_at = ?5
               WHERE id = ?1 AND status = 'PROCESSING'"#,
            params![id, retry_count, to_millis(next_attempt_at), error, to_millis(now)],
        )?;
        Ok(updated > 0)
    }

    fn mark_failed(
        &self,
        id: &str,
        retry_count: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE events
               SET status = 'FAILED', retry_count = ?2, error = ?3,
                   failed_at = ?4, updated_at = ?4
               WHERE id = ?1 AND status = 'PROCESSING'"#,
            params![id, retry_count, error, to_millis(now)],
        )?;
        Ok(updated > 0)
    }

    fn release_claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE events
               SET status = 'PENDING', started_at = NULL, updated_at = ?2
               WHERE id = ?1 AND status = 'PROCESSING'"#,
            params![id, to_millis(now)],
        )?;
        Ok(updated > 0)
    }

    fn recover_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let recovered = conn.execute(
            r#"UPDATE events
               SET status = 'PENDING', updated_at = ?2
               WHERE status = 'PROCESSING'
                 AND COALESCE(started_at, updated_at) < ?1"#,
            params![to_millis(claimed_before), to_millis(now)],
        )?;
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn record(id: &str, event_type: EventType, options: EmitOptions, now: DateTime<Utc>) -> EventRecord {
        EventRecord::new(
            id.to_string(),
            event_type,
            json!({ "id": id }),
            &options,
            DEFAULT_MAX_RETRIES,
            now,
        )
    }

    fn caps(entries: &[(EventType, usize)]) -> HashMap<EventType, usize> {
        entries.iter().cloned().collect()
    }

    fn all_caps() -> HashMap<EventType, usize> {
        caps(&[(EventType::FileExpired, 100), (EventType::FileScheduleExpiration, 100)])
    }

    #[test]
    fn test_create_new_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("events.db");

        let store = SqliteEventStore::new(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = store.conn.lock().unwrap();
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='events'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reopen_existing_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("events.db");

        {
            let store = SqliteEventStore::new(&db_path).unwrap();
            store
                .insert(&record("e1", EventType::FileExpired, EmitOptions::default(), t0()))
                .unwrap();
        }

        let store = SqliteEventStore::new(&db_path).unwrap();
        assert!(store.get("e1").unwrap().is_some());
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = SqliteEventStore::in_memory().unwrap();
        let options = EmitOptions::default()
            .with_priority(4)
            .scheduled_at(t0() + ChronoDuration::minutes(5))
            .with_metadata(json!({ "source": "upload" }));
        let original = record("e1", EventType::FileScheduleExpiration, options, t0());
        store.insert(&original).unwrap();

        let loaded = store.get("e1").unwrap().unwrap();
        assert_eq!(loaded.event_type, EventType::FileScheduleExpiration);
        assert_eq!(loaded.status, EventStatus::Scheduled);
        assert_eq!(loaded.priority, 4);
        assert_eq!(loaded.scheduled_at, original.scheduled_at);
        assert_eq!(loaded.created_at, t0());
        assert_eq!(loaded.payload, json!({ "id": "e1" }));
        assert_eq!(loaded.metadata, json!({ "source": "upload" }));
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_claim_orders_by_priority_then_age() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("low", EventType::FileExpired, EmitOptions::default().with_priority(1), t0()))
            .unwrap();
        store
            .insert(&record(
                "high",
                EventType::FileExpired,
                EmitOptions::default().with_priority(5),
                t0() + ChronoDuration::seconds(1),
            ))
            .unwrap();
        store
            .insert(&record(
                "low-newer",
                EventType::FileExpired,
                EmitOptions::default().with_priority(1),
                t0() + ChronoDuration::seconds(2),
            ))
            .unwrap();

        let now = t0() + ChronoDuration::seconds(10);
        let claimed = store.claim_due_batch(&all_caps(), 10, true, now).unwrap();
        let ids: Vec<&str> = claimed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "low-newer"]);
        assert!(claimed.iter().all(|r| r.status == EventStatus::Processing));
        assert!(claimed.iter().all(|r| r.started_at == Some(now)));
    }

    #[test]
    fn test_claim_respects_limit_and_priority() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("p1", EventType::FileExpired, EmitOptions::default().with_priority(1), t0()))
            .unwrap();
        store
            .insert(&record("p5", EventType::FileExpired, EmitOptions::default().with_priority(5), t0()))
            .unwrap();

        let claimed = store.claim_due_batch(&all_caps(), 1, true, t0()).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "p5");
        assert_eq!(store.get("p1").unwrap().unwrap().status, EventStatus::Pending);
    }

    #[test]
    fn test_claim_skips_future_records() {
        let store = SqliteEventStore::in_memory().unwrap();
        let later = EmitOptions::default().scheduled_at(t0() + ChronoDuration::hours(1));
        store
            .insert(&record("later", EventType::FileScheduleExpiration, later, t0()))
            .unwrap();

        assert!(store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap().is_empty());
        assert_eq!(store.get("later").unwrap().unwrap().status, EventStatus::Scheduled);

        let claimed = store
            .claim_due_batch(&all_caps(), 10, true, t0() + ChronoDuration::hours(1))
            .unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[test]
    fn test_claim_excludes_scheduled_when_disabled() {
        let store = SqliteEventStore::in_memory().unwrap();
        let soon = EmitOptions::default().scheduled_at(t0() + ChronoDuration::seconds(1));
        store
            .insert(&record("scheduled", EventType::FileExpired, soon, t0()))
            .unwrap();

        let now = t0() + ChronoDuration::seconds(5);
        assert!(store.claim_due_batch(&all_caps(), 10, false, now).unwrap().is_empty());
        assert_eq!(store.claim_due_batch(&all_caps(), 10, true, now).unwrap().len(), 1);
    }

    #[test]
    fn test_claim_ignores_types_without_capacity() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("a", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();
        store
            .insert(&record("b", EventType::FileScheduleExpiration, EmitOptions::default(), t0()))
            .unwrap();

        let claimed = store
            .claim_due_batch(&caps(&[(EventType::FileScheduleExpiration, 5)]), 10, true, t0())
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "b");
        assert_eq!(store.get("a").unwrap().unwrap().status, EventStatus::Pending);

        let counts = store.due_counts_by_type(t0(), true).unwrap();
        assert_eq!(counts, vec![("file.expired".to_string(), 1)]);
    }

    #[test]
    fn test_claim_caps_each_type() {
        let store = SqliteEventStore::in_memory().unwrap();
        for i in 0..4 {
            store
                .insert(&record(&format!("exp-{}", i), EventType::FileExpired, EmitOptions::default(), t0()))
                .unwrap();
        }
        store
            .insert(&record("sched", EventType::FileScheduleExpiration, EmitOptions::default(), t0()))
            .unwrap();

        let claimed = store
            .claim_due_batch(
                &caps(&[(EventType::FileExpired, 2), (EventType::FileScheduleExpiration, 2)]),
                10,
                true,
                t0(),
            )
            .unwrap();
        let expired = claimed
            .iter()
            .filter(|r| r.event_type == EventType::FileExpired)
            .count();
        assert_eq!(expired, 2);
        assert_eq!(claimed.len(), 3);
        assert_eq!(store.stats().unwrap().pending, 2);
    }

    #[test]
    fn test_claimed_record_is_not_claimed_again() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("e1", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();

        assert_eq!(store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap().len(), 1);
        assert!(store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_claimers_never_share_a_record() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("events.db");
        {
            let store = SqliteEventStore::new(&db_path).unwrap();
            for i in 0..50 {
                store
                    .insert(&record(&format!("e{}", i), EventType::FileExpired, EmitOptions::default(), t0()))
                    .unwrap();
            }
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db_path = db_path.clone();
                std::thread::spawn(move || {
                    let store = SqliteEventStore::new(&db_path).unwrap();
                    let mut ids = Vec::new();
                    loop {
                        let batch = store.claim_due_batch(&all_caps(), 3, true, t0()).unwrap();
                        if batch.is_empty() {
                            break;
                        }
                        ids.extend(batch.into_iter().map(|r| r.id));
                    }
                    ids
                })
            })
            .collect();

        let mut all_ids: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all_ids.len();
        all_ids.sort();
        all_ids.dedup();
        assert_eq!(total, 50);
        assert_eq!(all_ids.len(), 50);
    }

    #[test]
    fn test_mark_completed() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("e1", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();

        // not claimed yet
        assert!(!store.mark_completed("e1", t0()).unwrap());

        store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap();
        let done_at = t0() + ChronoDuration::seconds(3);
        assert!(store.mark_completed("e1", done_at).unwrap());

        let loaded = store.get("e1").unwrap().unwrap();
        assert_eq!(loaded.status, EventStatus::Completed);
        assert_eq!(loaded.processed_at, Some(done_at));
        assert!(!store.mark_completed("e1", done_at).unwrap());
    }

    #[test]
    fn test_mark_retry_and_failed() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("e1", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();
        store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap();

        let next = t0() + ChronoDuration::seconds(30);
        assert!(store.mark_retry("e1", 1, next, "boom", t0()).unwrap());
        let loaded = store.get("e1").unwrap().unwrap();
        assert_eq!(loaded.status, EventStatus::Pending);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.scheduled_at, Some(next));
        assert_eq!(loaded.error.as_deref(), Some("boom"));

        // not due until next
        assert!(store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap().is_empty());
        store.claim_due_batch(&all_caps(), 10, true, next).unwrap();

        assert!(store.mark_failed("e1", 3, "boom again", next).unwrap());
        let loaded = store.get("e1").unwrap().unwrap();
        assert_eq!(loaded.status, EventStatus::Failed);
        assert_eq!(loaded.retry_count, 3);
        assert_eq!(loaded.failed_at, Some(next));

        // terminal records never move again
        assert!(!store.mark_retry("e1", 1, next, "x", next).unwrap());
        assert!(!store.release_claim("e1", next).unwrap());
    }

    #[test]
    fn test_release_claim_keeps_retry_count() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("e1", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();
        store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap();

        assert!(store.release_claim("e1", t0()).unwrap());
        let loaded = store.get("e1").unwrap().unwrap();
        assert_eq!(loaded.status, EventStatus::Pending);
        assert_eq!(loaded.retry_count, 0);
        assert!(loaded.started_at.is_none());
    }

    #[test]
    fn test_recover_stale_processing() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("old", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();
        store.claim_due_batch(&all_caps(), 10, true, t0()).unwrap();

        let later = t0() + ChronoDuration::hours(2);
        store
            .insert(&record("fresh", EventType::FileExpired, EmitOptions::default(), later))
            .unwrap();
        store.claim_due_batch(&all_caps(), 10, true, later).unwrap();

        let recovered = store
            .recover_stale_processing(later - ChronoDuration::hours(1), later)
            .unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(store.get("old").unwrap().unwrap().status, EventStatus::Pending);
        assert_eq!(store.get("fresh").unwrap().unwrap().status, EventStatus::Processing);
    }

    #[test]
    fn test_stats_and_list_filters() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("a", EventType::FileExpired, EmitOptions::default().with_priority(2), t0()))
            .unwrap();
        store
            .insert(&record(
                "b",
                EventType::FileScheduleExpiration,
                EmitOptions::default().scheduled_at(t0() + ChronoDuration::hours(1)),
                t0() + ChronoDuration::seconds(1),
            ))
            .unwrap();
        store
            .insert(&record("c", EventType::FileExpired, EmitOptions::default(), t0() + ChronoDuration::seconds(2)))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.total(), 3);

        let expired = store
            .list(&EventFilter {
                event_type: Some(EventType::FileExpired),
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<&str> = expired.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let prioritized = store
            .list(&EventFilter {
                priority: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(prioritized.len(), 1);

        let scheduled = store
            .list(&EventFilter {
                status: Some(EventStatus::Scheduled),
                scheduled_after: Some(t0()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, "b");

        let page = store
            .list(&EventFilter {
                created_after: Some(t0()),
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "b");
    }

    #[test]
    fn test_list_skips_rows_with_unknown_type() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .insert(&record("known", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();
        store
            .insert(&record("future", EventType::FileExpired, EmitOptions::default(), t0()))
            .unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE events SET event_type = 'file.archived' WHERE id = 'future'",
                [],
            )
            .unwrap();

        let listed = store.list(&EventFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "known");
        assert_eq!(store.stats().unwrap().pending, 2);
    }
}
