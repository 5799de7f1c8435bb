//! The worker loop: polls for due records, claims them, and dispatches them to handlers.
//!
//! Each poll cycle claims at most as many records as there are free slots, both
//! globally and per type, so claimed records never wait in memory. Dispatches run
//! as tasks on a `TaskTracker`; stopping the loop closes the tracker and waits for
//! in-flight dispatches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::context::HandlerContext;
use super::emitter::Emitter;
use super::error::{EventError, HandlerError};
use super::models::EventRecord;
use super::registry::{HandlerRegistry, Registration};
use super::retry_policy::{RetryDecision, RetryPolicy};
use super::store::EventStore;
use super::types::EventType;
use crate::config::EventQueueSettings;
use crate::server::metrics;

#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    emitter: Emitter,
    retry_policy: RetryPolicy,
    settings: EventQueueSettings,
    /// Global dispatch slots
    slots: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<EventType, usize>>>,
    tracker: TaskTracker,
}

impl Worker {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        settings: EventQueueSettings,
    ) -> Self {
        let emitter = Emitter::new(store.clone(), clock.clone(), settings.default_max_retries);
        Self {
            store,
            registry,
            clock,
            emitter,
            retry_policy: RetryPolicy::new(&settings),
            slots: Arc::new(Semaphore::new(settings.max_concurrency)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            settings,
        }
    }

    /// Run the poll loop until `shutdown` is cancelled, then wait for in-flight dispatches.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Starting event worker (batch_size={}, max_concurrency={}, poll_interval={:?}, scheduled_events={})",
            self.settings.batch_size,
            self.settings.max_concurrency,
            self.settings.poll_interval(),
            self.settings.enable_scheduled_events
        );

        self.recover_stale_claims();

        loop {
            self.run_cycle(&shutdown);

            let sleep_duration = self.next_sleep();
            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {}
                _ = shutdown.cancelled() => {
                    info!("Event worker received shutdown signal");
                    break;
                }
            }
        }

        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!("Waiting for {} in-flight dispatch tasks to finish...", in_flight);
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!("Event worker stopped");
    }

    /// Run one cycle and wait for every dispatch it started. Returns the number of
    /// records dispatched.
    pub async fn process_once(&self) -> usize {
        let handles = self.run_cycle(&CancellationToken::new());
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Dispatch task failed: {}", e);
            }
        }
        count
    }

    /// One bounded poll cycle: claim what fits in the free slots and spawn a
    /// dispatch for each claimed record.
    pub fn run_cycle(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        if shutdown.is_cancelled() {
            return Vec::new();
        }

        let now = self.clock.now();
        let options = self.registry.enabled_options();
        let free_slots = self.slots.available_permits();
        let limit = self.settings.batch_size.min(free_slots);

        let capacities: HashMap<EventType, usize> = {
            let in_flight = self.in_flight.lock().unwrap();
            options
                .iter()
                .map(|(event_type, opts)| {
                    let capacity = match opts.max_concurrency {
                        Some(max) => {
                            max.saturating_sub(in_flight.get(event_type).copied().unwrap_or(0))
                        }
                        None => limit,
                    };
                    (*event_type, capacity.min(limit))
                })
                .filter(|(_, capacity)| *capacity > 0)
                .collect()
        };

        self.log_parked(now);

        if capacities.is_empty() {
            debug!(
                "No dispatch capacity this cycle ({} free slots, {} enabled handlers)",
                free_slots,
                options.len()
            );
            return Vec::new();
        }

        let claimed = match self.store.claim_due_batch(
            &capacities,
            limit,
            self.settings.enable_scheduled_events,
            now,
        ) {
            Ok(claimed) => claimed,
            Err(e) => {
                error!("Failed to claim events: {:#}", e);
                metrics::record_store_error("claim");
                return Vec::new();
            }
        };

        if claimed.is_empty() {
            return Vec::new();
        }
        metrics::record_claimed(claimed.len());
        debug!("Claimed {} events", claimed.len());

        let mut handles = Vec::with_capacity(claimed.len());
        for record in claimed {
            if let Some(handle) = self.spawn_dispatch(record) {
                handles.push(handle);
            }
        }
        handles
    }

    fn spawn_dispatch(&self, record: EventRecord) -> Option<JoinHandle<()>> {
        let registration = match self.registry.resolve_enabled(record.event_type) {
            Ok(registration) => registration,
            Err(e) => {
                // Unregistered or disabled since the capacity snapshot
                self.release(&record, &e);
                return None;
            }
        };
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.release(
                    &record,
                    &EventError::HandlerFault("no free dispatch slot".to_string()),
                );
                return None;
            }
        };

        *self
            .in_flight
            .lock()
            .unwrap()
            .entry(record.event_type)
            .or_insert(0) += 1;
        metrics::dispatch_started();

        let worker = self.clone();
        // Fired only on timeout, shutdown lets in-flight dispatches finish
        let cancel = CancellationToken::new();
        Some(
            self.tracker
                .spawn(async move { worker.dispatch(record, registration, permit, cancel).await }),
        )
    }

    fn release(&self, record: &EventRecord, reason: &EventError) {
        debug!("Releasing claim on event {}: {}", record.id, reason);
        if let Err(e) = self.store.release_claim(&record.id, self.clock.now()) {
            error!("Failed to release claim on event {}: {:#}", record.id, e);
            metrics::record_store_error("release_claim");
        }
    }

    async fn dispatch(
        &self,
        record: EventRecord,
        registration: Registration,
        _permit: OwnedSemaphorePermit,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let timeout = registration
            .options
            .timeout
            .unwrap_or_else(|| self.settings.default_timeout());

        debug!(
            "Dispatching event {} ({}), attempt {}",
            record.id,
            record.event_type,
            record.retry_count + 1
        );

        let ctx = HandlerContext::new(cancel.clone(), self.emitter.clone());
        let handler = registration.handler.clone();
        let task_record = record.clone();
        let task = self
            .tracker
            .spawn(async move { handler.dispatch(&task_record, &ctx).await });

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(HandlerError::retry(
                EventError::HandlerFault(join_error_message(join_error)).to_string(),
            )),
            Err(_) => {
                // The handler keeps running on the tracker until it observes the token
                cancel.cancel();
                Err(HandlerError::retry(
                    EventError::HandlerTimeout(timeout).to_string(),
                ))
            }
        };

        self.finish(&record, result, registration.options.retry_delay, started.elapsed());

        if let Some(count) = self.in_flight.lock().unwrap().get_mut(&record.event_type) {
            *count = count.saturating_sub(1);
        }
        metrics::dispatch_finished();
    }

    /// Write the outcome of one dispatch back to the store.
    fn finish(
        &self,
        record: &EventRecord,
        result: Result<(), HandlerError>,
        retry_delay: Option<Duration>,
        elapsed: Duration,
    ) {
        let now = self.clock.now();
        let event_type = record.event_type.as_str();

        let error = match result {
            Ok(()) => {
                match self.store.mark_completed(&record.id, now) {
                    Ok(true) => debug!(
                        "Event {} ({}) completed in {:?}",
                        record.id, event_type, elapsed
                    ),
                    Ok(false) => warn!(
                        "Event {} completed but was no longer PROCESSING",
                        record.id
                    ),
                    Err(e) => {
                        error!("Failed to mark event {} completed: {:#}", record.id, e);
                        metrics::record_store_error("mark_completed");
                    }
                }
                metrics::record_dispatch(event_type, "completed", elapsed);
                return;
            }
            Err(error) => error,
        };

        match self.retry_policy.decide(record, &error, retry_delay, now) {
            RetryDecision::Retry {
                retry_count,
                next_attempt_at,
            } => {
                debug!(
                    "Event {} ({}) failed, retry {}/{} at {}: {}",
                    record.id,
                    event_type,
                    retry_count,
                    record.max_retries,
                    next_attempt_at,
                    error
                );
                self.store_transition(
                    "mark_retry",
                    &record.id,
                    self.store
                        .mark_retry(&record.id, retry_count, next_attempt_at, &error.message, now),
                );
                metrics::record_dispatch(event_type, "retry", elapsed);
            }
            RetryDecision::Fail { retry_count } => {
                let failure = EventError::PermanentFailure(error.message.clone());
                warn!(
                    "Event {} ({}) failed after {} attempts: {}",
                    record.id, event_type, retry_count, failure
                );
                self.store_transition(
                    "mark_failed",
                    &record.id,
                    self.store
                        .mark_failed(&record.id, retry_count, &error.message, now),
                );
                metrics::record_dispatch(event_type, "failed", elapsed);
            }
        }
    }

    fn store_transition(&self, operation: &str, id: &str, result: anyhow::Result<bool>) {
        match result {
            Ok(true) => {}
            Ok(false) => warn!("Event {} was no longer PROCESSING during {}", id, operation),
            Err(e) => {
                error!("Failed to {} event {}: {:#}", operation, id, e);
                metrics::record_store_error(operation);
            }
        }
    }

    /// Return records left in PROCESSING by a crashed process to PENDING.
    pub fn recover_stale_claims(&self) -> usize {
        let now = self.clock.now();
        let claimed_before = match TimeDelta::from_std(self.settings.stale_processing_threshold())
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        {
            Some(at) => at,
            None => return 0,
        };

        match self.store.recover_stale_processing(claimed_before, now) {
            Ok(count) if count > 0 => {
                info!(
                    "Recovered {} events stuck in PROCESSING since before {}",
                    count, claimed_before
                );
                metrics::record_stale_recovered(count);
                count
            }
            Ok(_) => 0,
            Err(e) => {
                error!("Failed to recover stale events: {:#}", e);
                metrics::record_store_error("recover_stale");
                0
            }
        }
    }

    /// Log due records whose type has no enabled handler. They stay queued.
    fn log_parked(&self, now: DateTime<Utc>) {
        let counts = match self
            .store
            .due_counts_by_type(now, self.settings.enable_scheduled_events)
        {
            Ok(counts) => counts,
            Err(e) => {
                error!("Failed to count due events: {:#}", e);
                metrics::record_store_error("due_counts");
                return;
            }
        };

        for (type_name, count) in counts {
            let reason = match EventType::from_name(&type_name) {
                Some(event_type) => match self.registry.resolve_enabled(event_type) {
                    Ok(_) => continue,
                    Err(EventError::HandlerDisabled(_)) => "handler disabled",
                    Err(_) => "no handler registered",
                },
                None => "unknown type",
            };
            debug!("{} due events of type {} parked: {}", count, type_name, reason);
        }
    }

    fn next_sleep(&self) -> Duration {
        let jitter_ms = self.settings.poll_jitter_ms;
        let jitter = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        self.settings.poll_interval() + Duration::from_millis(jitter)
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

fn join_error_message(join_error: JoinError) -> String {
    if join_error.is_panic() {
        let panic = join_error.into_panic();
        if let Some(message) = panic.downcast_ref::<&str>() {
            format!("handler panicked: {}", message)
        } else if let Some(message) = panic.downcast_ref::<String>() {
            format!("handler panicked: {}", message)
        } else {
            "handler panicked".to_string()
        }
    } else {
        "handler task was cancelled".to_string()
    }
}
