//! Per-block execution bookkeeping: pending reservations, per-order status
//! projections and the recent-block ring.

use {
    crate::RECENT_BLOCKS,
    chrono::{DateTime, Utc},
    model::{
        execution::{ExecutionBlock, ExecutionOrder},
        order::OrderId,
    },
    std::collections::{HashMap, HashSet, VecDeque},
};

#[derive(Default)]
pub struct Records {
    pending: HashMap<OrderId, DateTime<Utc>>,
    execution_orders: HashMap<OrderId, ExecutionOrder>,
    executed: HashSet<OrderId>,
    blocks: HashMap<u64, ExecutionBlock>,
    recent: VecDeque<u64>,
}

impl Records {
    pub fn reserve_pending(
        &mut self,
        ids: impl IntoIterator<Item = OrderId>,
        until: DateTime<Utc>,
    ) {
        for id in ids {
            // A longer-lived reservation (a quarantine) wins over a shorter
            // one taken by a later block.
            let entry = self.pending.entry(id).or_insert(until);
            *entry = (*entry).max(until);
        }
    }

    pub fn pending_order_ids(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.pending
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn purge_expired_pending(&mut self, now: DateTime<Utc>) {
        self.pending.retain(|_, until| *until > now);
    }

    pub fn set_execution_order(&mut self, id: OrderId, record: ExecutionOrder) {
        if self.executed.contains(&id) {
            // An executed order is settled; nothing may overwrite it.
            return;
        }
        if record.is_executed() {
            self.executed.insert(id);
        }
        self.execution_orders.insert(id, record);
    }

    pub fn execution_order(&self, id: &OrderId) -> Option<&ExecutionOrder> {
        self.execution_orders.get(id)
    }

    pub fn is_executed(&self, id: &OrderId) -> bool {
        self.executed.contains(id)
    }

    pub fn set_block(&mut self, block: ExecutionBlock) {
        let number = block.number;
        if self.blocks.insert(number, block).is_none() {
            self.recent.push_back(number);
            while self.recent.len() > RECENT_BLOCKS {
                if let Some(evicted) = self.recent.pop_front() {
                    self.blocks.remove(&evicted);
                }
            }
        }
    }

    pub fn block(&self, number: u64) -> Option<&ExecutionBlock> {
        self.blocks.get(&number)
    }

    pub fn recent_blocks(&self) -> Vec<ExecutionBlock> {
        self.recent
            .iter()
            .rev()
            .filter_map(|number| self.blocks.get(number))
            .cloned()
            .collect()
    }
}
