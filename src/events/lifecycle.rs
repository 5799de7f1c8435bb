//! The event system service and its process-wide slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::clock::Clock;
use super::emitter::Emitter;
use super::error::EventError;
use super::handler::{EventHandler, HandlerOptions};
use super::models::{EmitOptions, EventFilter, EventRecord, EventStats};
use super::registry::HandlerRegistry;
use super::store::EventStore;
use super::types::EventPayload;
use super::worker::Worker;
use crate::config::EventQueueSettings;

static GLOBAL: OnceLock<Arc<EventSystem>> = OnceLock::new();

/// Store, registry, emitter and worker loop wired together.
///
/// `start` spawns the worker loop at most once. `stop` signals it and waits for
/// in-flight dispatches. A stopped system does not restart.
pub struct EventSystem {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    worker: Worker,
    shutdown: CancellationToken,
    started: AtomicBool,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventSystem {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        settings: EventQueueSettings,
    ) -> Self {
        let worker = Worker::new(store.clone(), registry.clone(), clock, settings);
        Self {
            store,
            registry,
            worker,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            run_handle: Mutex::new(None),
        }
    }

    /// Install `system` as the process-wide instance. If one is already
    /// installed, `system` is dropped and the existing one is returned.
    pub fn init_global(system: EventSystem) -> Arc<EventSystem> {
        let mut installed = false;
        let global = GLOBAL.get_or_init(|| {
            installed = true;
            Arc::new(system)
        });
        if !installed {
            warn!("Event system already initialized, reusing the existing instance");
        }
        global.clone()
    }

    pub fn global() -> Option<Arc<EventSystem>> {
        GLOBAL.get().cloned()
    }

    /// Spawn the worker loop. Must be called from within a tokio runtime.
    /// Returns false if the loop was already started.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let worker = self.worker.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move { worker.run(shutdown).await });
        *self.run_handle.lock().unwrap() = Some(handle);
        info!("Event system started");
        true
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Signal the worker loop and wait until it and its in-flight dispatches finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.run_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Event worker task ended abnormally: {}", e);
            }
            info!("Event system stopped");
        }
    }

    /// Run a single poll cycle and wait for its dispatches.
    pub async fn process_once(&self) -> usize {
        self.worker.process_once().await
    }

    pub fn register<H: EventHandler>(&self, handler: H, options: HandlerOptions) -> bool {
        self.registry.register(handler, options)
    }

    pub fn emit<P: EventPayload>(
        &self,
        payload: &P,
        options: EmitOptions,
    ) -> Result<EventRecord, EventError> {
        self.emitter().emit(payload, options)
    }

    pub fn emit_json(
        &self,
        type_name: &str,
        payload: JsonValue,
        options: EmitOptions,
    ) -> Result<EventRecord, EventError> {
        self.emitter().emit_json(type_name, payload, options)
    }

    pub fn reemit(&self, id: &str) -> Result<EventRecord, EventError> {
        self.emitter().reemit(id)
    }

    pub fn get(&self, id: &str) -> Result<EventRecord, EventError> {
        self.store
            .get(id)?
            .ok_or_else(|| EventError::NotFound(id.to_string()))
    }

    pub fn list(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError> {
        Ok(self.store.list(filter)?)
    }

    pub fn stats(&self) -> Result<EventStats, EventError> {
        Ok(self.store.stats()?)
    }

    pub fn emitter(&self) -> &Emitter {
        self.worker.emitter()
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }
}
