//! The upstream order-event stream. The real backing store lives outside
//! the core; its whole contract is captured by this trait.

use {
    async_trait::async_trait,
    futures::stream::BoxStream,
    model::{
        eth::{Address, ChainId},
        events::{Cursor, OrderEvent},
    },
};

#[async_trait]
pub trait OrderEventSource: Send + Sync + 'static {
    /// One page of events for the collection, ordered by
    /// `(timestamp, event_id)`, strictly after `after`, at most `limit`
    /// records. An empty page means the caller has caught up.
    async fn page(
        &self,
        chain_id: ChainId,
        collection: Address,
        after: Option<&Cursor>,
        limit: usize,
    ) -> anyhow::Result<Vec<OrderEvent>>;

    /// Live tail: batches of events strictly after `after`, in stream
    /// order. The stream ends when the source disconnects; callers decide
    /// whether to resubscribe.
    async fn subscribe(
        &self,
        chain_id: ChainId,
        collection: Address,
        after: Option<&Cursor>,
    ) -> anyhow::Result<BoxStream<'static, Vec<OrderEvent>>>;
}

/// The Postgres-backed event log the upstream indexer appends to. The tail
/// is a poll of the same paged query, which keeps the source trivially
/// resumable.
pub mod pg {
    use {
        super::*,
        futures::{StreamExt, stream},
        model::{events::OrderPayload, order::OrderId},
        sqlx::PgPool,
        std::{str::FromStr, time::Duration},
    };

    const TAIL_POLL_INTERVAL: Duration = Duration::from_secs(2);
    const TAIL_PAGE: usize = 500;

    #[derive(Clone)]
    pub struct PgOrderEvents {
        pool: PgPool,
    }

    impl PgOrderEvents {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn convert(collection: Address, row: database::order_events::Row) -> Option<OrderEvent> {
        let payload: OrderPayload = match serde_json::from_value(row.payload) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(event = %row.event_id, %err, "malformed event payload");
                return None;
            }
        };
        Some(OrderEvent {
            id: row.event_id,
            order_id: OrderId::try_from(row.order_id.as_slice()).ok()?,
            kind: match row.kind.as_str() {
                "added" => model::events::OrderEventKind::Added,
                _ => model::events::OrderEventKind::Modified,
            },
            status: serde_json::from_value(serde_json::Value::String(row.status)).ok()?,
            order: payload,
            source: model::source::OrderSource::from_str(&row.source).ok()?,
            source_order: row.source_order,
            gas_usage: u64::try_from(row.gas_usage).unwrap_or_default(),
            collection,
            timestamp: row.event_timestamp,
        })
    }

    #[async_trait]
    impl OrderEventSource for PgOrderEvents {
        async fn page(
            &self,
            chain_id: ChainId,
            collection: Address,
            after: Option<&Cursor>,
            limit: usize,
        ) -> anyhow::Result<Vec<OrderEvent>> {
            let mut conn = self.pool.acquire().await?;
            let rows = database::order_events::page(
                &mut conn,
                chain_id,
                &collection,
                after.map(|cursor| (cursor.timestamp, cursor.event_id.as_str())),
                i64::try_from(limit).unwrap_or(i64::MAX),
            )
            .await?;
            Ok(rows
                .into_iter()
                .filter_map(|row| convert(collection, row))
                .collect())
        }

        async fn subscribe(
            &self,
            chain_id: ChainId,
            collection: Address,
            after: Option<&Cursor>,
        ) -> anyhow::Result<BoxStream<'static, Vec<OrderEvent>>> {
            let source = self.clone();
            let stream = stream::unfold(after.cloned(), move |mut cursor| {
                let source = source.clone();
                async move {
                    loop {
                        match source
                            .page(chain_id, collection, cursor.as_ref(), TAIL_PAGE)
                            .await
                        {
                            Ok(events) if events.is_empty() => {
                                tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                            }
                            Ok(events) => {
                                cursor = events.last().map(|event| event.cursor());
                                return Some((events, cursor));
                            }
                            Err(err) => {
                                tracing::warn!(?err, "event tail poll failed");
                                tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                            }
                        }
                    }
                }
            });
            Ok(stream.boxed())
        }
    }
}

/// In-memory event source for tests and the forked-network mode: a fixed
/// backlog plus a broadcast channel for the tail.
pub mod in_memory {
    use {
        super::*,
        futures::StreamExt,
        std::sync::{Arc, Mutex},
        tokio::sync::broadcast,
        tokio_stream::wrappers::BroadcastStream,
    };

    #[derive(Clone)]
    pub struct InMemoryEvents {
        backlog: Arc<Mutex<Vec<OrderEvent>>>,
        live: broadcast::Sender<Vec<OrderEvent>>,
    }

    impl Default for InMemoryEvents {
        fn default() -> Self {
            Self {
                backlog: Default::default(),
                live: broadcast::channel(1024).0,
            }
        }
    }

    impl InMemoryEvents {
        pub fn new() -> Self {
            Self::default()
        }

        /// Appends to the backlog served by `page`.
        pub fn push_backlog(&self, event: OrderEvent) {
            let mut backlog = self.backlog.lock().unwrap();
            backlog.push(event);
            backlog.sort_by(|a, b| a.cursor().cmp(&b.cursor()));
        }

        /// Publishes a live batch to current subscribers.
        pub fn publish(&self, batch: Vec<OrderEvent>) {
            let _ = self.live.send(batch);
        }
    }

    #[async_trait]
    impl OrderEventSource for InMemoryEvents {
        async fn page(
            &self,
            _chain_id: ChainId,
            collection: Address,
            after: Option<&Cursor>,
            limit: usize,
        ) -> anyhow::Result<Vec<OrderEvent>> {
            let backlog = self.backlog.lock().unwrap();
            Ok(backlog
                .iter()
                .filter(|event| event.collection == collection)
                .filter(|event| {
                    after.is_none_or(|after| event.cursor().position() > after.position())
                })
                .take(limit)
                .cloned()
                .collect())
        }

        async fn subscribe(
            &self,
            _chain_id: ChainId,
            _collection: Address,
            _after: Option<&Cursor>,
        ) -> anyhow::Result<BoxStream<'static, Vec<OrderEvent>>> {
            let stream = BroadcastStream::new(self.live.subscribe())
                .filter_map(|batch| async move { batch.ok() });
            Ok(stream.boxed())
        }
    }
}
