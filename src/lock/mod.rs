//! Cross-process mutual exclusion
//!
//! Exactly one process may migrate a given database at a time. Engines with
//! server-side cooperative locks get an advisory lock held on a dedicated
//! session-scoped connection; engines without server-side locking fall back
//! to a pid-stamped lock file.
//!
//! Acquisition is non-blocking, try-once: `Ok(false)` means another migrator
//! holds the lock and the current invocation should become a deferred no-op.
//! It is never an error. Callers wanting wait-and-retry loop externally.

mod advisory;
mod file;

pub use advisory::PgAdvisoryLock;
pub use file::FileLock;

use crate::error::MigrationError;
use async_trait::async_trait;

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Try to take the lock. Returns false when it is already held elsewhere.
    /// Re-acquiring a lock this provider already holds returns true.
    async fn acquire(&mut self) -> Result<bool, MigrationError>;

    /// Release the lock. Idempotent: releasing a lock that is not held is a
    /// no-op.
    async fn release(&mut self) -> Result<(), MigrationError>;
}
