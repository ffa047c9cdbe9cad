//! Monotonic exchange nonces for the match executor. The database
//! transaction is the source of truth; the on-chain min nonce is only a
//! floor, because executor-signed orders in flight may not have advanced
//! the on-chain counter yet.

use {
    contracts::Exchange,
    database::nonces::{self, Key},
    model::eth::{Address, ChainId, U256},
    sqlx::PgPool,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to read on-chain min nonce: {0}")]
    Chain(#[from] alloy::contract::Error),
}

/// Vends exchange nonces for executor-side orders.
#[async_trait::async_trait]
pub trait NonceSource: Send + Sync + 'static {
    async fn next(&self) -> Result<U256, Error>;
}

pub struct NonceProvider {
    db: PgPool,
    exchange: Exchange,
    key: Key,
}

impl NonceProvider {
    pub fn new(db: PgPool, exchange: Exchange, chain_id: ChainId, match_executor: Address) -> Self {
        let key = Key {
            chain_id,
            match_executor,
            exchange: *exchange.address(),
        };
        Self { db, exchange, key }
    }

    /// Allocates the next nonce. Concurrent callers serialize on the row
    /// lock, so every caller observes a strictly larger value.
    async fn allocate(&self) -> Result<U256, Error> {
        // The record read takes the row lock inside the transaction; the
        // chain read has no ordering constraints, so both run in parallel.
        let on_chain = self.exchange.userMinOrderNonce(self.key.match_executor);
        let transaction = async {
            let mut tx = self.db.begin().await?;
            let current = nonces::select_for_update(&mut tx, &self.key).await?;
            Ok::<_, sqlx::Error>((tx, current))
        };
        let (on_chain, transaction) = tokio::join!(on_chain.call(), transaction);
        let floor = on_chain?;
        let (mut tx, current) = transaction?;

        let next = match current {
            Some(current) => current.max(floor) + U256::from(1),
            // First use: seed from the chain.
            None => floor + U256::from(1),
        };
        nonces::upsert(&mut tx, &self.key, next).await?;
        tx.commit().await?;
        tracing::debug!(nonce = %next, "allocated executor nonce");
        Ok(next)
    }
}

#[async_trait::async_trait]
impl NonceSource for NonceProvider {
    async fn next(&self) -> Result<U256, Error> {
        self.allocate().await
    }
}
