//! The canonical in-process order store.
//!
//! One store instance owns every known order and its lifecycle status, the
//! ordered price indexes that make matching a bounded range query, the
//! global match index keyed by gas-price tolerance, and the per-block
//! execution bookkeeping (pending reservations, status records, the
//! recent-block ring).
//!
//! Cross-process exclusion is handled above this crate by leases: at most
//! one relay writes a collection's orders and one engine consumes the match
//! index, so a process-local store with interior locking gives the same
//! semantics a shared remote cache would.

use {
    chrono::{DateTime, Utc},
    model::{
        eth::{Gwei, U256},
        execution::{ExecutionBlock, ExecutionOrder},
        matches::{Match, MatchId},
        order::{Order, OrderId, OrderStatus},
    },
    std::sync::{Arc, Mutex},
};

mod books;
mod matches;
mod records;

pub use books::PriceQuery;

/// How many execution-block records the liveness ring keeps.
pub const RECENT_BLOCKS: usize = 16;

#[derive(Default)]
struct Inner {
    books: books::Books,
    matches: matches::Matches,
    records: records::Records,
}

/// Shared handle to the store. Cheap to clone.
#[derive(Clone, Default)]
pub struct OrderStore(Arc<Mutex<Inner>>);

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or updates an order together with its status. Idempotent;
    /// a status transition away from `Active` drops the order from the
    /// price indexes and garbage collects its matches.
    pub fn put(&self, order: Order, status: OrderStatus) {
        let mut inner = self.lock();
        let id = order.id;
        inner.books.put(order, status);
        if !status.is_active() {
            inner.matches.remove_for_order(&id);
        }
    }

    pub fn get(&self, id: &OrderId) -> Option<Order> {
        self.lock().books.get(id).cloned()
    }

    pub fn status(&self, id: &OrderId) -> Option<OrderStatus> {
        self.lock().books.status(id)
    }

    /// Executes one of the three bounded range queries matching is built
    /// on. Only active orders appear in the result.
    pub fn active_price_set(&self, query: PriceQuery, limit: usize) -> Vec<(OrderId, U256)> {
        self.lock().books.active_price_set(query, limit)
    }

    /// Records a discovered match, indexing it by gas tolerance and under
    /// both of its orders. Re-discovering a match id overwrites the
    /// previous record.
    pub fn record_match(&self, m: Match) {
        self.lock().matches.record(m);
    }

    pub fn get_match(&self, id: &MatchId) -> Option<Match> {
        self.lock().matches.get(id).cloned()
    }

    pub fn matches_for_order(&self, id: &OrderId) -> Vec<MatchId> {
        self.lock().matches.for_order(id)
    }

    /// The top `limit` matches tolerating at least `gas_price`, best
    /// tolerance first, newest first on ties. Matches whose orders are no
    /// longer both active, or already executed, are skipped.
    pub fn best_matches(&self, gas_price: Gwei, limit: usize) -> Vec<Match> {
        let inner = self.lock();
        let Inner {
            books,
            matches,
            records,
        } = &*inner;
        matches.best(gas_price, limit, |id| {
            books.status(id).is_some_and(|status| status.is_active())
                && !records.is_executed(id)
        })
    }

    /// Reserves orders as taken by an in-flight block until `until`.
    pub fn reserve_pending(&self, ids: impl IntoIterator<Item = OrderId>, until: DateTime<Utc>) {
        self.lock().records.reserve_pending(ids, until);
    }

    /// Ids currently reserved by an in-flight (or quarantined) attempt.
    pub fn pending_order_ids(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.lock().records.pending_order_ids(now)
    }

    /// Drops reservations that have expired.
    pub fn purge_expired_pending(&self, now: DateTime<Utc>) {
        self.lock().records.purge_expired_pending(now);
    }

    /// Writes the per-order projection of a block outcome. Executed records
    /// additionally mark the order as consumed so that no later block can
    /// re-emit it.
    pub fn set_execution_order(&self, id: OrderId, record: ExecutionOrder) {
        self.lock().records.set_execution_order(id, record);
    }

    pub fn execution_order(&self, id: &OrderId) -> Option<ExecutionOrder> {
        self.lock().records.execution_order(id).cloned()
    }

    pub fn set_block(&self, block: ExecutionBlock) {
        self.lock().records.set_block(block);
    }

    pub fn block(&self, number: u64) -> Option<ExecutionBlock> {
        self.lock().records.block(number).cloned()
    }

    /// The capped list of the most recent execution-block records, newest
    /// first.
    pub fn recent_blocks(&self) -> Vec<ExecutionBlock> {
        self.lock().records.recent_blocks()
    }

    /// Counts used by the health report.
    pub fn stats(&self) -> Stats {
        let inner = self.lock();
        Stats {
            orders: inner.books.len(),
            active_orders: inner.books.active_len(),
            matches: inner.matches.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub orders: usize,
    pub active_orders: usize,
    pub matches: usize,
}
