//! Candidate discovery and match classification.
//!
//! Given one order, the engine picks one of three range-query plans over
//! the store's price indexes, classifies every candidate on the opposite
//! side, and records the accepted matches under the global gas-price index.

use {
    chrono::Utc,
    model::{
        eth::{Gwei, U256},
        matches::{Match, match_id},
        order::{Order, Side},
    },
    order_store::{OrderStore, PriceQuery},
    thiserror::Error,
};

/// Most candidates a single matching call may classify.
pub const MATCH_LIMIT: usize = 50;

/// Extra gas the broker path spends on top of the source marketplace's own
/// fill, mostly for the native settlement legs.
pub const GAS_BUFFER: u64 = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// Not an error of either order, just not a trade: the offer does not
    /// cover the listing's price.
    #[error("offer price {offer} does not cover listing price {listing}")]
    PriceNotCrossed { listing: U256, offer: U256 },
    /// A non-native offer against a native listing has no execution shape.
    /// This is an internal invariant: the plans never produce the pairing,
    /// so encountering it is a bug, not a retryable condition.
    #[error("unsupported pairing: non-native offer against a native listing")]
    UnsupportedPairing,
    /// Gas-adjusted arbitrage rounds to zero tolerance; the match could
    /// never be included profitably.
    #[error("match tolerates no gas price")]
    NoGasTolerance,
}

#[derive(Clone)]
pub struct MatchingEngine {
    store: OrderStore,
    metrics: &'static Metrics,
}

impl MatchingEngine {
    pub fn new(store: OrderStore) -> Self {
        Self {
            store,
            metrics: Metrics::get(),
        }
    }

    /// Finds, classifies and records every match for `order`. Returns the
    /// recorded matches, best gas tolerance first.
    pub fn match_order(&self, order: &Order) -> Vec<Match> {
        let candidates = self
            .store
            .active_price_set(plan(order), MATCH_LIMIT)
            .into_iter()
            // Candidates whose full record is missing are index leftovers;
            // skip them.
            .filter_map(|(id, _)| self.store.get(&id));

        let mut matches: Vec<Match> = candidates
            .filter_map(|candidate| {
                let (listing, offer) = sides(order, &candidate);
                match classify(listing, offer) {
                    Ok(m) => Some(m),
                    Err(ClassifyError::UnsupportedPairing) => {
                        // Should be unreachable through the plans.
                        tracing::error!(
                            listing = %listing.id,
                            offer = %offer.id,
                            "classifier saw an unsupported pairing"
                        );
                        None
                    }
                    Err(err) => {
                        tracing::debug!(candidate = %candidate.id, %err, "candidate rejected");
                        None
                    }
                }
            })
            .collect();

        // Deterministic order: best tolerance first; ties by the offer's
        // start time, then by id.
        matches.sort_by(|a, b| {
            b.max_gas_price_gwei
                .cmp(&a.max_gas_price_gwei)
                .then(a.offer.start_time.cmp(&b.offer.start_time))
                .then(a.id.cmp(&b.id))
        });

        for m in &matches {
            self.store.record_match(m.clone());
        }
        self.metrics.matches_found.inc_by(matches.len() as u64);
        matches
    }
}

/// Which range query finds the opposite side of `order`.
fn plan(order: &Order) -> PriceQuery {
    match (order.side, order.token_id) {
        // An offer on a specific token takes the cheapest listings of that
        // token up to the offer's price.
        (Side::Offer, Some(token_id)) => PriceQuery::TokenListings {
            collection: order.collection,
            token_id,
            max_price: order.price,
        },
        // A collection-wide offer takes the cheapest listings anywhere in
        // the collection.
        (Side::Offer, None) => PriceQuery::CollectionListings {
            collection: order.collection,
            max_price: order.price,
        },
        // A listing takes the highest offers that can pay for its token,
        // including collection-wide ones.
        (Side::Listing, Some(token_id)) => PriceQuery::TokenAndCollectionOffers {
            collection: order.collection,
            token_id,
            min_price: order.price,
        },
        (Side::Listing, None) => PriceQuery::TokenAndCollectionOffers {
            collection: order.collection,
            token_id: U256::ZERO,
            min_price: order.price,
        },
    }
}

fn sides<'a>(order: &'a Order, candidate: &'a Order) -> (&'a Order, &'a Order) {
    match order.side {
        Side::Listing => (order, candidate),
        Side::Offer => (candidate, order),
    }
}

/// Decides whether a (listing, offer) pair is economically executable and
/// derives its gas-price tolerance.
pub fn classify(listing: &Order, offer: &Order) -> Result<Match, ClassifyError> {
    if offer.price < listing.price {
        return Err(ClassifyError::PriceNotCrossed {
            listing: listing.price,
            offer: offer.price,
        });
    }

    let (is_native, max_gas_price_gwei, arbitrage_wei) =
        match (listing.is_native(), offer.is_native()) {
            // Both sides settle at the exchange; the offer's tolerance is
            // the only gas bound and there is nothing to arbitrage.
            (true, true) => (true, offer.max_gas_price_gwei(), U256::ZERO),
            // The offer funds buying the listing out of its marketplace;
            // profit is the price difference, and the gas spent eats into
            // it.
            (false, true) => {
                let arbitrage = offer.price - listing.price;
                let gas = U256::from(listing.gas_usage + GAS_BUFFER);
                let break_even = Gwei::from_wei(arbitrage / gas);
                let tolerance = offer.max_gas_price_gwei().min(break_even);
                if tolerance == Gwei(0) {
                    return Err(ClassifyError::NoGasTolerance);
                }
                (false, tolerance, arbitrage)
            }
            (true, false) | (false, false) => {
                return Err(ClassifyError::UnsupportedPairing);
            }
        };

    Ok(Match {
        id: match_id(&offer.id, &listing.id),
        listing: listing.clone(),
        offer: offer.clone(),
        is_native,
        max_gas_price_gwei,
        arbitrage_wei,
        discovered_at: Utc::now(),
    })
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "matching")]
struct Metrics {
    /// Matches discovered and recorded.
    matches_found: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        model::{
            eth::Address,
            order::{Maker, OrderId, OrderStatus},
            source::OrderSource,
        },
    };

    fn eth(milli: u64) -> U256 {
        U256::from(milli) * U256::from(10u64).pow(U256::from(15))
    }

    fn order(byte: u8, side: Side, source: OrderSource, price: U256) -> Order {
        Order {
            id: OrderId::repeat_byte(byte),
            side,
            maker: Maker::User {
                signer: Address::repeat_byte(byte),
                signature: vec![byte].into(),
            },
            currency: Address::ZERO,
            complication: Address::repeat_byte(0xcc),
            collection: Address::repeat_byte(0xc0),
            token_id: Some(U256::from(1)),
            num_items: 1,
            price,
            start_time: byte as u64,
            end_time: 0,
            nonce: U256::from(byte),
            max_gas_price: U256::from(20_000_000_000u64),
            source,
            source_order: serde_json::Value::Null,
            gas_usage: if source.is_native() { 0 } else { 300_000 },
        }
    }

    #[test]
    fn native_pair_takes_the_offer_tolerance() {
        let listing = order(1, Side::Listing, OrderSource::Native, eth(100));
        let offer = order(2, Side::Offer, OrderSource::Native, eth(100));
        let m = classify(&listing, &offer).unwrap();
        assert!(m.is_native);
        assert_eq!(m.max_gas_price_gwei, Gwei(20));
        assert_eq!(m.arbitrage_wei, U256::ZERO);
    }

    #[test]
    fn price_inversion_is_rejected() {
        let listing = order(1, Side::Listing, OrderSource::Native, eth(101));
        let offer = order(2, Side::Offer, OrderSource::Native, eth(100));
        assert!(matches!(
            classify(&listing, &offer),
            Err(ClassifyError::PriceNotCrossed { .. })
        ));
    }

    #[test]
    fn arbitrage_tolerance_is_gas_bounded() {
        // 1.1 ETH native offer against a 1.0 WETH Seaport listing with
        // 300k fill gas: 0.1e18 / 400_000 = 250 gwei break-even, above the
        // offer's own 20 gwei bound.
        let listing = order(1, Side::Listing, OrderSource::SeaportV1_5, eth(1000));
        let offer = order(2, Side::Offer, OrderSource::Native, eth(1100));
        let m = classify(&listing, &offer).unwrap();
        assert!(!m.is_native);
        assert_eq!(m.arbitrage_wei, eth(100));
        assert_eq!(m.max_gas_price_gwei, Gwei(20));

        // With a tiny spread the break-even is the binding constraint:
        // 4e14 / 400_000 = 1e9 wei = 1 gwei.
        let offer_small = Order {
            price: eth(1000) + U256::from(400_000_000_000_000u64),
            ..offer
        };
        let m = classify(&listing, &offer_small).unwrap();
        assert_eq!(m.max_gas_price_gwei, Gwei(1));
    }

    #[test]
    fn unprofitable_arbitrage_is_rejected() {
        let listing = order(1, Side::Listing, OrderSource::SeaportV1_5, eth(1000));
        // Equal prices: arbitrage is zero, tolerance rounds to zero.
        let offer = order(2, Side::Offer, OrderSource::Native, eth(1000));
        assert_eq!(classify(&listing, &offer), Err(ClassifyError::NoGasTolerance));
    }

    #[test]
    fn non_native_offer_against_native_listing_is_an_invariant_error() {
        let listing = order(1, Side::Listing, OrderSource::Native, eth(100));
        let offer = order(2, Side::Offer, OrderSource::SeaportV1_5, eth(200));
        assert_eq!(
            classify(&listing, &offer),
            Err(ClassifyError::UnsupportedPairing)
        );
    }

    #[test]
    fn match_order_finds_and_records_crossing_candidates() {
        let store = OrderStore::new();
        let engine = MatchingEngine::new(store.clone());

        let cheap = order(1, Side::Listing, OrderSource::Native, eth(90));
        let pricey = order(2, Side::Listing, OrderSource::Native, eth(200));
        store.put(cheap.clone(), OrderStatus::Active);
        store.put(pricey, OrderStatus::Active);

        let offer = order(3, Side::Offer, OrderSource::Native, eth(100));
        store.put(offer.clone(), OrderStatus::Active);

        let matches = engine.match_order(&offer);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].listing.id, cheap.id);
        assert_eq!(
            store.best_matches(Gwei(0), 10).len(),
            1,
            "the match is in the global index"
        );
        assert_eq!(
            store.matches_for_order(&offer.id).len(),
            1,
            "both sides are linked"
        );
    }

    #[test]
    fn collection_offer_takes_cheapest_listings_across_tokens() {
        let store = OrderStore::new();
        let engine = MatchingEngine::new(store.clone());

        let mut cheap = order(1, Side::Listing, OrderSource::Native, eth(80));
        cheap.token_id = Some(U256::from(10));
        let mut pricier = order(2, Side::Listing, OrderSource::Native, eth(90));
        pricier.token_id = Some(U256::from(11));
        store.put(cheap.clone(), OrderStatus::Active);
        store.put(pricier.clone(), OrderStatus::Active);

        let mut collection_offer = order(3, Side::Offer, OrderSource::Native, eth(100));
        collection_offer.token_id = None;
        store.put(collection_offer.clone(), OrderStatus::Active);

        let matches = engine.match_order(&collection_offer);
        let listings: Vec<_> = matches.iter().map(|m| m.listing.id).collect();
        assert_eq!(listings, vec![cheap.id, pricier.id]);
    }

    #[test]
    fn candidate_reads_are_bounded() {
        let store = OrderStore::new();
        let engine = MatchingEngine::new(store.clone());

        let offer = order(0xf0, Side::Offer, OrderSource::Native, eth(100));
        for n in 0..(MATCH_LIMIT as u8 + 10) {
            let mut listing = order(n, Side::Listing, OrderSource::Native, eth(50));
            listing.token_id = offer.token_id;
            store.put(listing, OrderStatus::Active);
        }
        store.put(offer.clone(), OrderStatus::Active);

        assert_eq!(engine.match_order(&offer).len(), MATCH_LIMIT);
    }

    #[test]
    fn ties_order_by_offer_start_time_then_id() {
        let store = OrderStore::new();
        let engine = MatchingEngine::new(store.clone());

        let listing = order(1, Side::Listing, OrderSource::Native, eth(100));
        store.put(listing.clone(), OrderStatus::Active);
        // Same price and tolerance; byte doubles as the start time, so the
        // lower byte sorts first.
        let late = order(9, Side::Offer, OrderSource::Native, eth(100));
        let early = order(3, Side::Offer, OrderSource::Native, eth(100));
        store.put(late.clone(), OrderStatus::Active);
        store.put(early.clone(), OrderStatus::Active);

        let matches = engine.match_order(&listing);
        let offers: Vec<_> = matches.iter().map(|m| m.offer.id).collect();
        assert_eq!(offers, vec![early.id, late.id]);
    }
}
