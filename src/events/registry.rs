//! In-memory map from event type to handler and options.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::error::EventError;
use super::handler::{erase, ErasedHandler, EventHandler, HandlerOptions};
use super::types::EventType;

#[derive(Clone)]
pub struct Registration {
    pub handler: Arc<dyn ErasedHandler>,
    pub options: HandlerOptions,
}

/// One handler per type. Registering again replaces the previous entry.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<HashMap<EventType, Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for its payload's event type. Returns true if an
    /// existing registration was replaced.
    pub fn register<H: EventHandler>(&self, handler: H, options: HandlerOptions) -> bool {
        self.register_erased(erase(handler), options)
    }

    pub fn register_erased(&self, handler: Arc<dyn ErasedHandler>, options: HandlerOptions) -> bool {
        let event_type = handler.event_type();
        let replaced = self
            .entries
            .write()
            .unwrap()
            .insert(event_type, Registration { handler, options })
            .is_some();
        if replaced {
            info!("Replaced handler for {}", event_type);
        } else {
            info!("Registered handler for {}", event_type);
        }
        replaced
    }

    /// Returns true if a registration was removed.
    pub fn unregister(&self, event_type: EventType) -> bool {
        let removed = self.entries.write().unwrap().remove(&event_type).is_some();
        if removed {
            info!("Unregistered handler for {}", event_type);
        }
        removed
    }

    pub fn resolve(&self, event_type: EventType) -> Result<Registration, EventError> {
        self.entries
            .read()
            .unwrap()
            .get(&event_type)
            .cloned()
            .ok_or_else(|| EventError::NotFound(format!("handler for {}", event_type)))
    }

    /// Like `resolve`, but a disabled registration is an error too.
    pub fn resolve_enabled(&self, event_type: EventType) -> Result<Registration, EventError> {
        let registration = self.resolve(event_type)?;
        if !registration.options.enabled {
            return Err(EventError::HandlerDisabled(event_type.to_string()));
        }
        Ok(registration)
    }

    pub fn set_enabled(&self, event_type: EventType, enabled: bool) -> Result<(), EventError> {
        let mut entries = self.entries.write().unwrap();
        let registration = entries
            .get_mut(&event_type)
            .ok_or_else(|| EventError::NotFound(format!("handler for {}", event_type)))?;
        registration.options.enabled = enabled;
        info!(
            "Handler for {} {}",
            event_type,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn registered_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.entries.read().unwrap().keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Snapshot of the options of every enabled registration.
    pub fn enabled_options(&self) -> HashMap<EventType, HandlerOptions> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, registration)| registration.options.enabled)
            .map(|(event_type, registration)| (*event_type, registration.options.clone()))
            .collect()
    }
}
