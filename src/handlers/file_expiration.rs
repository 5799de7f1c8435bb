//! Handlers for the file expiration flow.
//!
//! `file.schedule-expiration` checks the stored file and queues a `file.expired`
//! event for its expiry time; `file.expired` deletes it.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::events::{
    EmitOptions, EventHandler, EventRecord, FileExpiredPayload, FileScheduleExpirationPayload,
    HandlerContext, HandlerError,
};

/// Reject names that could step outside the storage directory.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_within(root: &Path, path: &Path) -> bool {
    path.starts_with(root) && !path.components().any(|c| c == Component::ParentDir)
}

pub struct ScheduleExpirationHandler {
    storage_dir: PathBuf,
}

impl ScheduleExpirationHandler {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }
}

#[async_trait]
impl EventHandler for ScheduleExpirationHandler {
    type Payload = FileScheduleExpirationPayload;

    async fn handle(
        &self,
        payload: FileScheduleExpirationPayload,
        record: &EventRecord,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        if !is_plain_name(&payload.user_id) || !is_plain_name(&payload.file_name) {
            return Err(HandlerError::permanent(format!(
                "Refusing path components {}/{}",
                payload.user_id, payload.file_name
            )));
        }

        let path = self.storage_dir.join(&payload.user_id).join(&payload.file_name);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HandlerError::permanent(format!(
                    "File {} not found at {:?}",
                    payload.file_id, path
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(HandlerError::permanent(format!(
                "{:?} is not a regular file",
                path
            )));
        }

        let expired = FileExpiredPayload {
            file_id: payload.file_id,
            user_id: payload.user_id,
            file_name: payload.file_name,
            file_path: path.to_string_lossy().to_string(),
            size: metadata.len(),
        };
        let follow_up = ctx.emitter.emit(
            &expired,
            EmitOptions::default()
                .with_priority(record.priority)
                .scheduled_at(payload.expires_at),
        )?;

        info!(
            "Scheduled expiration of file {} ({} bytes) at {} as event {}",
            expired.file_id, expired.size, payload.expires_at, follow_up.id
        );
        Ok(())
    }
}

pub struct FileExpiredHandler {
    storage_dir: PathBuf,
}

impl FileExpiredHandler {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }
}

#[async_trait]
impl EventHandler for FileExpiredHandler {
    type Payload = FileExpiredPayload;

    async fn handle(
        &self,
        payload: FileExpiredPayload,
        _record: &EventRecord,
        _ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        let path = PathBuf::from(&payload.file_path);
        if !is_within(&self.storage_dir, &path) {
            return Err(HandlerError::permanent(format!(
                "Refusing to delete {:?} outside {:?}",
                path, self.storage_dir
            )));
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted expired file {} at {:?}", payload.file_id, path);
                Ok(())
            }
            // Delivery is at-least-once, an earlier attempt may have deleted it
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Expired file {} already gone", payload.file_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
