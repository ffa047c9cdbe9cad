//! Where the relay keeps its stream position.

use {
    async_trait::async_trait,
    model::{
        eth::{Address, ChainId},
        events::Cursor,
    },
    sqlx::PgPool,
};

#[async_trait]
pub trait CursorStore: Send + Sync + 'static {
    async fn load(&self, chain_id: ChainId, collection: &Address)
    -> anyhow::Result<Option<Cursor>>;
    async fn save(
        &self,
        chain_id: ChainId,
        collection: &Address,
        cursor: &Cursor,
    ) -> anyhow::Result<()>;
}

pub struct PgCursors(pub PgPool);

#[async_trait]
impl CursorStore for PgCursors {
    async fn load(
        &self,
        chain_id: ChainId,
        collection: &Address,
    ) -> anyhow::Result<Option<Cursor>> {
        let mut conn = self.0.acquire().await?;
        Ok(database::cursors::load(&mut conn, chain_id, collection).await?)
    }

    async fn save(
        &self,
        chain_id: ChainId,
        collection: &Address,
        cursor: &Cursor,
    ) -> anyhow::Result<()> {
        let mut conn = self.0.acquire().await?;
        database::cursors::save(&mut conn, chain_id, collection, cursor).await?;
        Ok(())
    }
}

/// In-memory cursor store for tests.
pub mod in_memory {
    use {
        super::*,
        std::{
            collections::HashMap,
            sync::{Arc, Mutex},
        },
    };

    #[derive(Clone, Default)]
    pub struct InMemoryCursors {
        cursors: Arc<Mutex<HashMap<(ChainId, Address), Cursor>>>,
    }

    impl InMemoryCursors {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, chain_id: ChainId, collection: &Address) -> Option<Cursor> {
            self.cursors
                .lock()
                .unwrap()
                .get(&(chain_id, *collection))
                .cloned()
        }
    }

    #[async_trait]
    impl CursorStore for InMemoryCursors {
        async fn load(
            &self,
            chain_id: ChainId,
            collection: &Address,
        ) -> anyhow::Result<Option<Cursor>> {
            Ok(self.get(chain_id, collection))
        }

        async fn save(
            &self,
            chain_id: ChainId,
            collection: &Address,
            cursor: &Cursor,
        ) -> anyhow::Result<()> {
            self.cursors
                .lock()
                .unwrap()
                .insert((chain_id, *collection), cursor.clone());
            Ok(())
        }
    }
}
