//! Order records, statuses and the ordered price indexes.
//!
//! Index invariants:
//! - every active listing is in the (collection, token) listing set and the
//!   collection-wide listing set, scored by price;
//! - every active token offer is in the (collection, token) offer set;
//! - every active collection-wide offer is in the collection offer set.
//! Orders in any other status appear in none of them.

use {
    model::{
        eth::{Address, U256},
        order::{Order, OrderId, OrderStatus, Side},
    },
    std::collections::{BTreeSet, HashMap},
};

const MAX_ID: OrderId = OrderId::repeat_byte(0xff);

/// Entries are `(price_wei, order_id)` so that equal prices order
/// deterministically by id.
type PriceSet = BTreeSet<(U256, OrderId)>;

/// One of the three set-combination plans matching runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceQuery {
    /// Cheapest listings of one token first, capped at the offer's price.
    TokenListings {
        collection: Address,
        token_id: U256,
        max_price: U256,
    },
    /// Highest offers able to take one token first: offers on the token
    /// unioned with collection-wide offers, floored at the listing's price.
    TokenAndCollectionOffers {
        collection: Address,
        token_id: U256,
        min_price: U256,
    },
    /// Cheapest listings anywhere in the collection first, capped at a
    /// collection-wide offer's price.
    CollectionListings {
        collection: Address,
        max_price: U256,
    },
}

#[derive(Default)]
pub struct Books {
    orders: HashMap<OrderId, Order>,
    statuses: HashMap<OrderId, OrderStatus>,
    token_listings: HashMap<(Address, U256), PriceSet>,
    token_offers: HashMap<(Address, U256), PriceSet>,
    collection_offers: HashMap<Address, PriceSet>,
    collection_listings: HashMap<Address, PriceSet>,
}

impl Books {
    pub fn put(&mut self, order: Order, status: OrderStatus) {
        let id = order.id;
        self.deindex(&id);
        if status.is_active() {
            self.index(&order);
        }
        self.orders.insert(id, order);
        self.statuses.insert(id, status);
    }

    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn status(&self, id: &OrderId) -> Option<OrderStatus> {
        self.statuses.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn active_len(&self) -> usize {
        self.statuses
            .values()
            .filter(|status| status.is_active())
            .count()
    }

    pub fn active_price_set(&self, query: PriceQuery, limit: usize) -> Vec<(OrderId, U256)> {
        match query {
            PriceQuery::TokenListings {
                collection,
                token_id,
                max_price,
            } => self
                .token_listings
                .get(&(collection, token_id))
                .map(|set| ascending(set, max_price, limit))
                .unwrap_or_default(),
            PriceQuery::CollectionListings {
                collection,
                max_price,
            } => self
                .collection_listings
                .get(&collection)
                .map(|set| ascending(set, max_price, limit))
                .unwrap_or_default(),
            PriceQuery::TokenAndCollectionOffers {
                collection,
                token_id,
                min_price,
            } => {
                // Union into a scratch set, then traverse from the top.
                let mut union: PriceSet = PriceSet::new();
                if let Some(set) = self.token_offers.get(&(collection, token_id)) {
                    union.extend(range_from(set, min_price).copied());
                }
                if let Some(set) = self.collection_offers.get(&collection) {
                    union.extend(range_from(set, min_price).copied());
                }
                union
                    .into_iter()
                    .rev()
                    .take(limit)
                    .map(|(price, id)| (id, price))
                    .collect()
            }
        }
    }

    fn index(&mut self, order: &Order) {
        let entry = (order.price, order.id);
        match (order.side, order.token_id) {
            (Side::Listing, Some(token_id)) => {
                self.token_listings
                    .entry((order.collection, token_id))
                    .or_default()
                    .insert(entry);
                self.collection_listings
                    .entry(order.collection)
                    .or_default()
                    .insert(entry);
            }
            (Side::Listing, None) => {
                // A listing always names the token it sells; admission
                // refuses anything else, so nothing to index.
                tracing::warn!(id = %order.id, "listing without token id not indexed");
            }
            (Side::Offer, Some(token_id)) => {
                self.token_offers
                    .entry((order.collection, token_id))
                    .or_default()
                    .insert(entry);
            }
            (Side::Offer, None) => {
                self.collection_offers
                    .entry(order.collection)
                    .or_default()
                    .insert(entry);
            }
        }
    }

    fn deindex(&mut self, id: &OrderId) {
        let Some(order) = self.orders.get(id) else {
            return;
        };
        let entry = (order.price, order.id);
        match (order.side, order.token_id) {
            (Side::Listing, Some(token_id)) => {
                remove(&mut self.token_listings, &(order.collection, token_id), &entry);
                remove(&mut self.collection_listings, &order.collection, &entry);
            }
            (Side::Listing, None) => (),
            (Side::Offer, Some(token_id)) => {
                remove(&mut self.token_offers, &(order.collection, token_id), &entry);
            }
            (Side::Offer, None) => {
                remove(&mut self.collection_offers, &order.collection, &entry);
            }
        }
    }
}

fn remove<K: std::hash::Hash + Eq>(
    sets: &mut HashMap<K, PriceSet>,
    key: &K,
    entry: &(U256, OrderId),
) {
    if let Some(set) = sets.get_mut(key) {
        set.remove(entry);
        if set.is_empty() {
            sets.remove(key);
        }
    }
}

fn ascending(set: &PriceSet, max_price: U256, limit: usize) -> Vec<(OrderId, U256)> {
    set.range(..=(max_price, MAX_ID))
        .take(limit)
        .map(|&(price, id)| (id, price))
        .collect()
}

fn range_from(
    set: &PriceSet,
    min_price: U256,
) -> impl Iterator<Item = &(U256, OrderId)> {
    set.range((min_price, OrderId::ZERO)..)
}
