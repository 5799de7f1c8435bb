//! Default handlers wired by the `event-worker` binary.

mod file_expiration;

pub use file_expiration::{FileExpiredHandler, ScheduleExpirationHandler};

use std::path::Path;

use crate::events::{HandlerOptions, HandlerRegistry};

/// Register the handlers for every known event type, rooted at `storage_dir`.
pub fn register_default_handlers(registry: &HandlerRegistry, storage_dir: &Path) {
    registry.register(
        ScheduleExpirationHandler::new(storage_dir),
        HandlerOptions::default(),
    );
    registry.register(
        FileExpiredHandler::new(storage_dir),
        HandlerOptions::default().with_max_concurrency(2),
    );
}
