//! PostgreSQL advisory lock
//!
//! `pg_try_advisory_lock` is session-scoped: the lock lives exactly as long
//! as the connection that took it. The provider therefore opens a dedicated,
//! non-pooled connection on acquire and keeps it (plus its driver task) alive
//! until release — a pooled connection could be recycled under us and
//! silently release the lock mid-migration.

use crate::config::DatabaseSettings;
use crate::error::MigrationError;
use crate::lock::LockProvider;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub struct PgAdvisoryLock {
    config: tokio_postgres::Config,
    key: i64,
    session: Option<LockSession>,
}

struct LockSession {
    client: tokio_postgres::Client,
    driver: tokio::task::JoinHandle<()>,
}

impl PgAdvisoryLock {
    pub fn new(settings: &DatabaseSettings, lock_name: &str) -> Self {
        Self {
            config: settings.pg_config(),
            key: lock_key(lock_name),
            session: None,
        }
    }

    /// The 64-bit advisory key derived from the lock name.
    pub fn key(&self) -> i64 {
        self.key
    }
}

#[async_trait]
impl LockProvider for PgAdvisoryLock {
    async fn acquire(&mut self) -> Result<bool, MigrationError> {
        if self.session.is_some() {
            return Ok(true);
        }

        let (client, connection) = self.config.connect(tokio_postgres::NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "advisory lock connection terminated");
            }
        });

        let row = match client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&self.key])
            .await
        {
            Ok(row) => row,
            Err(e) => {
                drop(client);
                driver.abort();
                return Err(e.into());
            }
        };

        let acquired: bool = row.get(0);
        if acquired {
            debug!(key = self.key, "advisory lock acquired");
            self.session = Some(LockSession { client, driver });
            Ok(true)
        } else {
            debug!(key = self.key, "advisory lock held by another session");
            drop(client);
            driver.abort();
            Ok(false)
        }
    }

    async fn release(&mut self) -> Result<(), MigrationError> {
        if let Some(session) = self.session.take() {
            // Unlock explicitly; if that fails, dropping the session releases
            // the lock server-side anyway since it is session-scoped.
            if let Err(e) = session
                .client
                .query_one("SELECT pg_advisory_unlock($1)", &[&self.key])
                .await
            {
                warn!(key = self.key, error = %e, "pg_advisory_unlock failed; dropping session connection");
            } else {
                debug!(key = self.key, "advisory lock released");
            }
            drop(session.client);
            session.driver.abort();
        }
        Ok(())
    }
}

/// Derive a stable 64-bit lock key from a lock name.
fn lock_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable_and_name_sensitive() {
        assert_eq!(lock_key("schemadrift"), lock_key("schemadrift"));
        assert_ne!(lock_key("schemadrift"), lock_key("other-app"));
    }

    #[test]
    fn provider_starts_unheld() {
        let lock = PgAdvisoryLock::new(&DatabaseSettings::default(), "schemadrift");
        assert!(lock.session.is_none());
        assert_eq!(lock.key(), lock_key("schemadrift"));
    }
}
