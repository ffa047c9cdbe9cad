//! The per-collection order relay: snapshot bootstrap, cursor-driven
//! catch-up, then the live tail. Every admitted order lands in the store;
//! active ones are forwarded to the matching engine.

use {
    crate::{
        domain::{
            admission::{self, AdmissionConfig},
            health::{CollectionHealth, JobSender},
        },
        infra::{CursorStore, OrderEventSource, SnapshotSource},
    },
    futures::StreamExt,
    model::{
        eth::{Address, ChainId},
        events::{Cursor, OrderEvent, OrderEventKind},
        order::{Order, OrderStatus},
    },
    order_store::OrderStore,
    std::sync::{Arc, atomic::Ordering},
    thiserror::Error,
    tokio::sync::watch,
};

/// Events fetched per catch-up page.
const PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum Error {
    #[error("order event stream disconnected")]
    StreamDisconnected,
    #[error("event source error: {0}")]
    Source(#[from] anyhow::Error),
}

pub struct OrderRelay {
    pub chain_id: ChainId,
    pub collection: Address,
    pub store: OrderStore,
    pub events: Arc<dyn OrderEventSource>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub cursors: Arc<dyn CursorStore>,
    pub admission: AdmissionConfig,
    pub matching_jobs: JobSender<Order>,
    pub health: Arc<CollectionHealth>,
}

impl OrderRelay {
    /// Runs the relay until the abort signal flips or the stream fails.
    /// Ok(()) means a requested shutdown.
    pub async fn run(&self, abort: &mut watch::Receiver<bool>) -> Result<(), Error> {
        let mut cursor = self.load_cursor().await?;
        if cursor.is_none() {
            cursor = self.bootstrap().await?;
        }
        let cursor = self.catch_up(cursor, abort).await?;
        if *abort.borrow() {
            return Ok(());
        }
        self.tail(cursor, abort).await
    }

    async fn load_cursor(&self) -> Result<Option<Cursor>, Error> {
        Ok(self.cursors.load(self.chain_id, &self.collection).await?)
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), Error> {
        Ok(self.cursors.save(self.chain_id, &self.collection, cursor).await?)
    }

    /// First run for this collection: load the most recent snapshot and
    /// insert everything in it as active. The cursor is the snapshot's
    /// advertised timestamp.
    async fn bootstrap(&self) -> Result<Option<Cursor>, Error> {
        let Some(metadata) = self.snapshots.latest(self.chain_id, self.collection).await? else {
            tracing::info!(collection = %self.collection, "no snapshot, starting from the stream head");
            return Ok(None);
        };

        tracing::info!(
            collection = %self.collection,
            num_orders = metadata.num_orders,
            timestamp = %metadata.timestamp,
            "bootstrapping from snapshot"
        );
        let mut records = self.snapshots.records(&metadata).await?;
        let mut inserted = 0u64;
        while let Some(record) = records.next().await {
            let record = record.map_err(Error::Source)?;
            match admission::admit(
                &self.admission,
                record.id,
                &record.order,
                record.source,
                record.source_order.clone(),
                record.gas_usage,
            ) {
                Ok(order) => {
                    self.accept(order, OrderStatus::Active);
                    inserted += 1;
                }
                Err(err) => {
                    tracing::warn!(order = %record.id, %err, "snapshot order refused");
                }
            }
        }
        tracing::info!(collection = %self.collection, inserted, "snapshot loaded");

        let cursor = Cursor::snapshot_boundary(metadata.timestamp);
        self.save_cursor(&cursor).await?;
        Ok(Some(cursor))
    }

    /// Pages the stream from the cursor up to "now", saving the cursor
    /// after every page.
    async fn catch_up(
        &self,
        mut cursor: Option<Cursor>,
        abort: &watch::Receiver<bool>,
    ) -> Result<Option<Cursor>, Error> {
        loop {
            if *abort.borrow() {
                return Ok(cursor);
            }
            let page = self
                .events
                .page(self.chain_id, self.collection, cursor.as_ref(), PAGE_SIZE)
                .await?;
            let Some(last) = page.last() else {
                return Ok(cursor);
            };
            let next = last.cursor();
            for event in &page {
                self.process_event(event);
            }
            self.save_cursor(&next).await?;
            cursor = Some(next);
        }
    }

    /// Follows the live stream, saving the cursor after every batch.
    async fn tail(
        &self,
        mut cursor: Option<Cursor>,
        abort: &mut watch::Receiver<bool>,
    ) -> Result<(), Error> {
        let mut stream = self
            .events
            .subscribe(self.chain_id, self.collection, cursor.as_ref())
            .await?;
        loop {
            let batch = tokio::select! {
                _ = abort.changed() => return Ok(()),
                batch = stream.next() => batch.ok_or(Error::StreamDisconnected)?,
            };
            for event in &batch {
                // The subscription replays from its own position; drop
                // anything at or before the cursor.
                if let Some(cursor) = &cursor
                    && event.cursor().position() <= cursor.position()
                {
                    continue;
                }
                self.process_event(event);
            }
            if let Some(last) = batch.last() {
                let next = last.cursor();
                if cursor.as_ref().is_none_or(|cursor| next > *cursor) {
                    self.save_cursor(&next).await?;
                    cursor = Some(next);
                }
            }
        }
    }

    /// Admission plus the store write; active orders go on to matching.
    fn process_event(&self, event: &OrderEvent) {
        self.health.relay_events.fetch_add(1, Ordering::Relaxed);
        match event.kind {
            OrderEventKind::Modified => {
                // Most-recent-event documents are assumed immutable; a
                // modification is an upstream violation worth flagging, but
                // not acting on.
                tracing::warn!(
                    event = %event.id,
                    order = %event.order_id,
                    "order event modified in place, ignoring"
                );
            }
            OrderEventKind::Added => {
                match admission::admit(
                    &self.admission,
                    event.order_id,
                    &event.order,
                    event.source,
                    event.source_order.clone(),
                    event.gas_usage,
                ) {
                    Ok(order) => self.accept(order, event.status),
                    Err(err) => {
                        tracing::warn!(order = %event.order_id, %err, "order refused");
                    }
                }
            }
        }
    }

    fn accept(&self, order: Order, status: OrderStatus) {
        self.store.put(order.clone(), status);
        if status.is_active() && !self.matching_jobs.send(order) {
            tracing::warn!("matching queue closed, dropping job");
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            domain::health::job_queue,
            infra::{
                cursors::in_memory::InMemoryCursors,
                events::in_memory::InMemoryEvents,
                snapshots::in_memory::InMemorySnapshots,
            },
        },
        chrono::{DateTime, TimeZone, Utc},
        futures::FutureExt,
        model::{
            events::{NftPayload, OrderPayload, SnapshotMetadata, SnapshotRecord, TokenPayload},
            order::OrderId,
            source::OrderSource,
        },
        std::time::Duration,
    };

    fn admission() -> AdmissionConfig {
        AdmissionConfig {
            complication: Address::repeat_byte(0xcc),
            wrapped_native: Address::repeat_byte(0xee),
        }
    }

    fn collection() -> Address {
        Address::repeat_byte(0xc0)
    }

    fn payload(token: u64) -> OrderPayload {
        OrderPayload {
            is_sell_order: true,
            signer: Address::repeat_byte(0xaa),
            constraints: vec![
                model::eth::U256::from(1),
                model::eth::U256::from(100),
                model::eth::U256::from(100),
                model::eth::U256::ZERO,
                model::eth::U256::ZERO,
                model::eth::U256::from(token),
                model::eth::U256::from(20_000_000_000u64),
            ],
            nfts: vec![NftPayload {
                collection: collection(),
                tokens: vec![TokenPayload {
                    token_id: model::eth::U256::from(token),
                    num_tokens: 1,
                }],
            }],
            exec_params: [Address::repeat_byte(0xcc), Address::ZERO],
            extra_params: Default::default(),
            sig: vec![0x01].into(),
        }
    }

    fn event(
        id: &str,
        order: u8,
        token: u64,
        status: OrderStatus,
        kind: OrderEventKind,
        timestamp: DateTime<Utc>,
    ) -> OrderEvent {
        OrderEvent {
            id: id.to_string(),
            order_id: OrderId::repeat_byte(order),
            kind,
            status,
            order: payload(token),
            source: OrderSource::Native,
            source_order: serde_json::Value::Null,
            gas_usage: 0,
            collection: collection(),
            timestamp,
        }
    }

    /// Snapshot bootstrap, catch-up and live tail: the store ends up with
    /// the snapshot minus the cancellations, and the cursor strictly
    /// advances over the replay.
    #[tokio::test]
    async fn bootstrap_then_tail() {
        let store = OrderStore::new();
        let events = InMemoryEvents::new();
        let snapshots = InMemorySnapshots::new();
        let cursors = InMemoryCursors::new();
        let snapshot_time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        snapshots.insert(
            SnapshotMetadata {
                bucket: "snapshots".to_string(),
                file: "latest.ndjson".to_string(),
                chain_id: ChainId(1),
                collection: collection(),
                num_orders: 20,
                timestamp: snapshot_time,
            },
            (0..20)
                .map(|n| SnapshotRecord {
                    id: OrderId::repeat_byte(n),
                    order: payload(n as u64),
                    source: OrderSource::Native,
                    source_order: serde_json::Value::Null,
                    gas_usage: 0,
                })
                .collect(),
        );

        // A timestamp tie with the snapshot boundary must not replay.
        events.push_backlog(event(
            "tie",
            0,
            0,
            OrderStatus::Cancelled,
            OrderEventKind::Added,
            snapshot_time,
        ));
        // Two cancellations and a violation of immutability after it.
        events.push_backlog(event(
            "cancel-1",
            1,
            1,
            OrderStatus::Cancelled,
            OrderEventKind::Added,
            snapshot_time + chrono::Duration::seconds(1),
        ));
        events.push_backlog(event(
            "cancel-2",
            2,
            2,
            OrderStatus::Cancelled,
            OrderEventKind::Added,
            snapshot_time + chrono::Duration::seconds(2),
        ));
        events.push_backlog(event(
            "modified",
            3,
            3,
            OrderStatus::Cancelled,
            OrderEventKind::Modified,
            snapshot_time + chrono::Duration::seconds(3),
        ));

        let (matching_tx, _matching_rx) = job_queue();
        let relay = OrderRelay {
            chain_id: ChainId(1),
            collection: collection(),
            store: store.clone(),
            events: Arc::new(events.clone()),
            snapshots: Arc::new(snapshots),
            cursors: Arc::new(cursors.clone()),
            admission: admission(),
            matching_jobs: matching_tx,
            health: Arc::new(CollectionHealth::default()),
        };
        let (abort_tx, mut abort_rx) = watch::channel(false);
        let task = tokio::spawn(async move { relay.run(&mut abort_rx).await });

        // Give the relay time to bootstrap and subscribe, then cancel one
        // more order through the live tail.
        tokio::time::sleep(Duration::from_millis(100)).await;
        events.publish(vec![event(
            "cancel-3",
            4,
            4,
            OrderStatus::Cancelled,
            OrderEventKind::Added,
            snapshot_time + chrono::Duration::seconds(4),
        )]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let stats = store.stats();
        assert_eq!(stats.orders, 20);
        assert_eq!(stats.active_orders, 17, "three cancellations applied");
        // The snapshot-tied event must have been skipped.
        assert_eq!(
            store.status(&OrderId::repeat_byte(0)),
            Some(OrderStatus::Active)
        );
        // Modified events are logged, not applied.
        assert_eq!(
            store.status(&OrderId::repeat_byte(3)),
            Some(OrderStatus::Active)
        );
        // The cursor strictly advanced past everything processed.
        let cursor = cursors.get(ChainId(1), &collection()).unwrap();
        assert_eq!(cursor.event_id, "cancel-3");
    }

    /// Without a snapshot the relay starts from the head of the stream.
    #[tokio::test]
    async fn no_snapshot_replays_the_whole_stream() {
        let store = OrderStore::new();
        let events = InMemoryEvents::new();
        let cursors = InMemoryCursors::new();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for n in 0..3u8 {
            events.push_backlog(event(
                &format!("add-{n}"),
                n,
                n as u64,
                OrderStatus::Active,
                OrderEventKind::Added,
                start + chrono::Duration::seconds(n as i64),
            ));
        }

        let (matching_tx, mut matching_rx) = job_queue();
        let relay = OrderRelay {
            chain_id: ChainId(1),
            collection: collection(),
            store: store.clone(),
            events: Arc::new(events),
            snapshots: Arc::new(InMemorySnapshots::new()),
            cursors: Arc::new(cursors.clone()),
            admission: admission(),
            matching_jobs: matching_tx,
            health: Arc::new(CollectionHealth::default()),
        };
        let (abort_tx, mut abort_rx) = watch::channel(false);
        let task = tokio::spawn(async move { relay.run(&mut abort_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(store.stats().active_orders, 3);
        assert_eq!(
            cursors.get(ChainId(1), &collection()).unwrap().event_id,
            "add-2"
        );
        // Every active order became a matching job.
        let mut jobs = 0;
        while matching_rx.recv().now_or_never().flatten().is_some() {
            jobs += 1;
        }
        assert_eq!(jobs, 3);
    }
}
