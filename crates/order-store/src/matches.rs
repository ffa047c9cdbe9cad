//! The global match index.
//!
//! Matches are never deleted directly: they drop out when a status
//! transition deactivates one of their orders, which removes every match
//! the order participates in.

use {
    chrono::{DateTime, Utc},
    model::{
        eth::Gwei,
        matches::{Match, MatchId},
        order::OrderId,
    },
    std::collections::{BTreeSet, HashMap, HashSet},
};

/// Heap key. Iterated in reverse this yields the highest tolerance first
/// and, within equal tolerances, the most recently discovered match first.
type GasKey = (Gwei, DateTime<Utc>, MatchId);

#[derive(Default)]
pub struct Matches {
    by_id: HashMap<MatchId, Match>,
    by_gas: BTreeSet<GasKey>,
    by_order: HashMap<OrderId, HashSet<MatchId>>,
}

impl Matches {
    pub fn record(&mut self, m: Match) {
        if let Some(previous) = self.by_id.get(&m.id) {
            self.by_gas.remove(&key(previous));
        }
        self.by_gas.insert(key(&m));
        for id in m.order_ids() {
            self.by_order.entry(id).or_default().insert(m.id.clone());
        }
        self.by_id.insert(m.id.clone(), m);
    }

    pub fn get(&self, id: &MatchId) -> Option<&Match> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn for_order(&self, id: &OrderId) -> Vec<MatchId> {
        self.by_order
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove_for_order(&mut self, id: &OrderId) {
        let Some(match_ids) = self.by_order.remove(id) else {
            return;
        };
        for match_id in match_ids {
            let Some(m) = self.by_id.remove(&match_id) else {
                continue;
            };
            self.by_gas.remove(&key(&m));
            // Unlink from the counterparty as well.
            for other in m.order_ids() {
                if other != *id
                    && let Some(set) = self.by_order.get_mut(&other)
                {
                    set.remove(&match_id);
                    if set.is_empty() {
                        self.by_order.remove(&other);
                    }
                }
            }
        }
    }

    /// Top `limit` matches with tolerance >= `gas_price` whose orders still
    /// pass `eligible`.
    pub fn best(
        &self,
        gas_price: Gwei,
        limit: usize,
        eligible: impl Fn(&OrderId) -> bool,
    ) -> Vec<Match> {
        self.by_gas
            .range((gas_price, DateTime::<Utc>::MIN_UTC, MatchId::new())..)
            .rev()
            .filter_map(|(_, _, id)| self.by_id.get(id))
            .filter(|m| m.order_ids().iter().all(&eligible))
            .take(limit)
            .cloned()
            .collect()
    }
}

fn key(m: &Match) -> GasKey {
    (m.max_gas_price_gwei, m.discovered_at, m.id.clone())
}
