//! Database schema for the events database.
//!
//! Timestamps are stored as INTEGER milliseconds since the Unix epoch.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Events Table - Version 0
// =============================================================================

const EVENTS_TABLE_V0: Table = Table {
    name: "events",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("event_type", SqlType::Text, non_null = true),
        sqlite_column!("payload", SqlType::Text, non_null = true),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("priority", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("scheduled_at", SqlType::Integer),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
        sqlite_column!("processed_at", SqlType::Integer),
        sqlite_column!("failed_at", SqlType::Integer),
        sqlite_column!("retry_count", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("max_retries", SqlType::Integer, non_null = true, default_value = Some("3")),
        sqlite_column!("error", SqlType::Text),
        sqlite_column!("metadata", SqlType::Text, non_null = true, default_value = Some("'{}'")),
    ],
    indices: &[
        ("idx_events_status_type", "status, event_type"),
        ("idx_events_due", "status, scheduled_at, created_at"),
        ("idx_events_priority", "priority, created_at"),
    ],
};

// =============================================================================
// Events Table - Version 1 (adds started_at)
// =============================================================================

const EVENTS_TABLE_V1: Table = Table {
    name: "events",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("event_type", SqlType::Text, non_null = true),
        sqlite_column!("payload", SqlType::Text, non_null = true),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("priority", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("scheduled_at", SqlType::Integer),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
        sqlite_column!("processed_at", SqlType::Integer),
        sqlite_column!("failed_at", SqlType::Integer),
        sqlite_column!("retry_count", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("max_retries", SqlType::Integer, non_null = true, default_value = Some("3")),
        sqlite_column!("error", SqlType::Text),
        sqlite_column!("metadata", SqlType::Text, non_null = true, default_value = Some("'{}'")),
        sqlite_column!("started_at", SqlType::Integer),
    ],
    indices: &[
        ("idx_events_status_type", "status, event_type"),
        ("idx_events_due", "status, scheduled_at, created_at"),
        ("idx_events_priority", "priority, created_at"),
    ],
};

fn migrate_v0_to_v1(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute("ALTER TABLE events ADD COLUMN started_at INTEGER", [])?;
    Ok(())
}

pub const EVENTS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[EVENTS_TABLE_V0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[EVENTS_TABLE_V1],
        migration: Some(migrate_v0_to_v1),
    },
];
