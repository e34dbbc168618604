//! File-based lock fallback
//!
//! For engines without server-side locking. The lock is a `create_new` file
//! stamped with the holder's process id; a file older than the staleness
//! threshold is treated as abandoned by a crashed migrator and removed before
//! one retry. A simple crash-recovery heuristic — there is no heartbeat
//! protocol behind it.

use crate::config::MigratorSettings;
use crate::error::MigrationError;
use crate::lock::LockProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct LockFileContents {
    pid: u32,
    holder: Uuid,
    acquired_at: DateTime<Utc>,
}

pub struct FileLock {
    path: PathBuf,
    stale_after: Duration,
    holder: Uuid,
    held: bool,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            holder: Uuid::new_v4(),
            held: false,
        }
    }

    pub fn from_settings(settings: &MigratorSettings) -> Self {
        let path = settings
            .lock_dir
            .join(format!("{}.lock", settings.lock_name));
        Self::new(path, settings.lock_stale_after)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn try_create(&self) -> Result<bool, MigrationError> {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                let contents = LockFileContents {
                    pid: std::process::id(),
                    holder: self.holder,
                    acquired_at: Utc::now(),
                };
                let body = serde_json::to_vec_pretty(&contents)
                    .map_err(|e| MigrationError::Lock(format!("encoding lock file: {e}")))?;
                file.write_all(&body).await.map_err(|e| {
                    MigrationError::Lock(format!(
                        "writing lock file {}: {e}",
                        self.path.display()
                    ))
                })?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(MigrationError::Lock(format!(
                "creating lock file {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn is_stale(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta
                .modified()
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .map(|age| age >= self.stale_after)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl LockProvider for FileLock {
    async fn acquire(&mut self) -> Result<bool, MigrationError> {
        if self.held {
            return Ok(true);
        }

        if self.try_create().await? {
            self.held = true;
            debug!(path = %self.path.display(), "file lock acquired");
            return Ok(true);
        }

        if self.is_stale().await {
            warn!(
                path = %self.path.display(),
                "removing stale lock file (holder presumed crashed)"
            );
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(MigrationError::Lock(format!(
                        "removing stale lock file {}: {e}",
                        self.path.display()
                    )));
                }
            }
            if self.try_create().await? {
                self.held = true;
                debug!(path = %self.path.display(), "file lock acquired after stale reclaim");
                return Ok(true);
            }
        }

        debug!(path = %self.path.display(), "file lock held by another migrator");
        Ok(false)
    }

    async fn release(&mut self) -> Result<(), MigrationError> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "file lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MigrationError::Lock(format!(
                "removing lock file {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.held {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
