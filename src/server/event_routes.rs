//! Admin routes for inspecting and remediating event records.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::events::{EventError, EventFilter, EventRecord, EventStatus, EventSystem};

use super::metrics;

pub type EventsState = Arc<EventSystem>;

#[derive(Serialize)]
struct EventListResponse {
    events: Vec<EventRecord>,
    limit: usize,
    offset: usize,
}

fn error_response(e: EventError) -> Response {
    match e {
        EventError::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {}", what)).into_response(),
        EventError::InvalidPayload { .. } | EventError::UnknownType(_) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        e => {
            warn!("Event admin request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// GET /stats - Record counts per status
async fn get_stats(State(system): State<EventsState>) -> Response {
    match system.stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET / - Records matching the filter query, newest first
async fn list_events(
    State(system): State<EventsState>,
    Query(filter): Query<EventFilter>,
) -> Response {
    let limit = filter.limit.unwrap_or(EventFilter::DEFAULT_LIMIT);
    let offset = filter.offset.unwrap_or(0);
    match system.list(&filter) {
        Ok(events) => Json(EventListResponse {
            events,
            limit,
            offset,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /{id}
async fn get_event(State(system): State<EventsState>, Path(id): Path<String>) -> Response {
    match system.get(&id) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /{id}/reemit - Queue a fresh copy of an existing record
async fn reemit_event(State(system): State<EventsState>, Path(id): Path<String>) -> Response {
    match system.reemit(&id) {
        Ok(record) => {
            info!("Admin re-emitted event {} as {}", id, record.id);
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /metrics - Prometheus text format, with per-status gauges refreshed first
async fn get_metrics(State(system): State<EventsState>) -> Response {
    match system.stats() {
        Ok(stats) => {
            for status in EventStatus::ALL {
                let count = match status {
                    EventStatus::Pending => stats.pending,
                    EventStatus::Scheduled => stats.scheduled,
                    EventStatus::Processing => stats.processing,
                    EventStatus::Completed => stats.completed,
                    EventStatus::Failed => stats.failed,
                };
                metrics::set_records_by_status(status.as_db_str(), count);
            }
        }
        Err(e) => warn!("Failed to refresh record gauges: {}", e),
    }
    metrics::metrics_handler().await.into_response()
}

/// Build the event admin routes.
///
/// - GET /v1/events/stats
/// - GET /v1/events
/// - GET /v1/events/{id}
/// - POST /v1/events/{id}/reemit
/// - GET /metrics
pub fn event_routes(system: EventsState) -> Router {
    let v1_events = Router::new()
        .route("/", get(list_events))
        .route("/stats", get(get_stats))
        .route("/{id}", get(get_event))
        .route("/{id}/reemit", post(reemit_event));

    Router::new()
        .nest("/v1/events", v1_events)
        .route("/metrics", get(get_metrics))
        .with_state(system)
}
