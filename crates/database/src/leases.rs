//! Distributed leases over Postgres advisory locks.
//!
//! A lease key maps to a two-integer session advisory lock. The lock lives
//! exactly as long as the holder's connection, so there is no TTL to renew;
//! instead the holder re-confirms on the renewal cadence that its session is
//! still alive and still owns the lock, and competitors retry on the same
//! cadence. A holder that dies releases the lock with its session, which
//! bounds how long it can block a successor.

use {
    model::eth::{Address, ChainId},
    sqlx::{PgPool, Postgres, pool::PoolConnection},
    std::time::Duration,
};

/// How often a non-holder retries acquisition, and how often a holder
/// confirms its session. Matches the lease TTL the rest of the system
/// assumes.
pub const RENEWAL_INTERVAL: Duration = Duration::from_secs(15);

pub fn matching_engine_key(chain_id: ChainId, collection: &Address) -> String {
    format!("matching-engine:chain:{chain_id}:collection:{collection:#x}:lock")
}

pub fn order_relay_key(chain_id: ChainId, collection: &Address) -> String {
    format!("order-relay:chain:{chain_id}:collection:{collection:#x}:lock")
}

pub fn block_scheduler_key(chain_id: ChainId) -> String {
    format!("block-scheduler:chain:{chain_id}:lock")
}

/// FNV-1a, spelled out. The advisory-lock keyspace is shared by every
/// process that ever competes for a lease, so the hash must not depend on
/// compiler or standard-library internals.
fn lock_key(key: &str) -> (i32, i32) {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in key.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    let bytes = hash.to_be_bytes();
    (
        i32::from_be_bytes(bytes[..4].try_into().expect("4 bytes")),
        i32::from_be_bytes(bytes[4..].try_into().expect("4 bytes")),
    )
}

pub struct Lease {
    pool: PgPool,
    key: String,
    class: i32,
    ident: i32,
    /// The connection whose session owns the lock, while we hold it.
    held: Option<PoolConnection<Postgres>>,
}

impl Lease {
    pub fn new(pool: PgPool, key: String) -> Self {
        let (class, ident) = lock_key(&key);
        Self {
            pool,
            key,
            class,
            ident,
            held: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Acquires the lease if it is free, or confirms one we already hold.
    /// Returns whether this instance holds the lease after the call.
    pub async fn try_acquire(&mut self) -> Result<bool, sqlx::Error> {
        const ACQUIRE: &str = r#"
SELECT pg_try_advisory_lock($1, $2);
        "#;

        if self.held.is_some() {
            if self.confirm().await {
                return Ok(true);
            }
            tracing::warn!(key = %self.key, "lease session died");
            self.held = None;
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar(ACQUIRE)
            .bind(self.class)
            .bind(self.ident)
            .fetch_one(&mut *conn)
            .await?;
        if acquired {
            tracing::info!(key = %self.key, "lease acquired");
            self.held = Some(conn);
        }
        Ok(acquired)
    }

    /// Whether the holding session is still alive. Advisory locks are only
    /// released explicitly or when the session ends, so re-taking the lock
    /// on the holder's own connection can only succeed — unless the
    /// connection is gone, in which case the probe errors. The re-take
    /// bumps the session's hold count, which [`Lease::release`] accounts
    /// for by dropping all of them at once.
    async fn confirm(&mut self) -> bool {
        const PROBE: &str = r#"
SELECT pg_try_advisory_lock($1, $2);
        "#;

        let Some(conn) = self.held.as_mut() else {
            return false;
        };
        sqlx::query_scalar::<_, bool>(PROBE)
            .bind(self.class)
            .bind(self.ident)
            .fetch_one(&mut **conn)
            .await
            .unwrap_or(false)
    }

    pub async fn release(&mut self) {
        const RELEASE: &str = r#"
SELECT pg_advisory_unlock_all();
        "#;

        let Some(mut conn) = self.held.take() else {
            return;
        };
        if let Err(err) = sqlx::query(RELEASE).execute(&mut *conn).await {
            // The lock still dies with the connection once it leaves the
            // pool; this only delays the handoff.
            tracing::warn!(key = %self.key, ?err, "lease release failed");
        } else {
            tracing::info!(key = %self.key, "lease released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        let collection = Address::repeat_byte(0xab);
        assert_eq!(
            matching_engine_key(ChainId(1), &collection),
            format!("matching-engine:chain:1:collection:{collection:#x}:lock"),
        );
        assert_eq!(
            order_relay_key(ChainId(5), &collection),
            format!("order-relay:chain:5:collection:{collection:#x}:lock"),
        );
        assert_eq!(block_scheduler_key(ChainId(1)), "block-scheduler:chain:1:lock");
    }

    #[test]
    fn lock_keys_are_stable_and_distinct() {
        // Processes of different builds must map a key to the same lock.
        assert_eq!(lock_key("block-scheduler:chain:1:lock"), lock_key("block-scheduler:chain:1:lock"));
        assert_ne!(
            lock_key(&order_relay_key(ChainId(1), &Address::repeat_byte(0xab))),
            lock_key(&matching_engine_key(ChainId(1), &Address::repeat_byte(0xab))),
        );
        assert_ne!(
            lock_key(&order_relay_key(ChainId(1), &Address::repeat_byte(0xab))),
            lock_key(&order_relay_key(ChainId(2), &Address::repeat_byte(0xab))),
        );
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_lease_is_exclusive() {
        let pool = PgPool::connect("postgresql://").await.unwrap();

        let mut first = Lease::new(pool.clone(), "test:lease".to_string());
        let mut second = Lease::new(pool.clone(), "test:lease".to_string());

        assert!(first.try_acquire().await.unwrap());
        // Confirming a held lease keeps holding it.
        assert!(first.try_acquire().await.unwrap());
        assert!(!second.try_acquire().await.unwrap());

        first.release().await;
        assert!(!first.is_held());
        assert!(second.try_acquire().await.unwrap());
        second.release().await;
    }
}
