use {
    crate::{
        eth::{Gwei, U256},
        order::{Order, OrderId},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Identifies a match by the pair of orders it clears:
/// `"{offer_id}:{listing_id}"`, both ids hex encoded. Re-discovering the
/// same pair overwrites the previous record.
pub type MatchId = String;

pub fn match_id(offer: &OrderId, listing: &OrderId) -> MatchId {
    format!("{offer:#x}:{listing:#x}")
}

/// A validated pairing of a listing and an offer that would clear at the
/// current prices, together with the economics that decide when it is worth
/// executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub listing: Order,
    pub offer: Order,
    /// Both sides settle directly at the exchange.
    pub is_native: bool,
    /// The highest gas price at which executing this match is still
    /// profitable (or, for native pairs, still tolerated by the offer).
    pub max_gas_price_gwei: Gwei,
    /// `offer.price - listing.price` when the offer is native and the
    /// listing is not; zero for native pairs.
    pub arbitrage_wei: U256,
    pub discovered_at: DateTime<Utc>,
}

impl Match {
    pub fn order_ids(&self) -> [OrderId; 2] {
        [self.offer.id, self.listing.id]
    }

    /// Accounts whose exchange nonce the match consumes, paired with the
    /// nonce. The match-executor side is excluded: its nonce is allocated
    /// at composition time.
    pub fn nonces(&self) -> impl Iterator<Item = (crate::eth::Address, U256)> + '_ {
        [&self.listing, &self.offer]
            .into_iter()
            .filter(|order| !order.is_match_executor_order())
            .map(|order| (order.signer(), order.nonce))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, alloy::primitives::B256};

    #[test]
    fn match_id_is_offer_then_listing() {
        let offer = B256::repeat_byte(0xaa);
        let listing = B256::repeat_byte(0xbb);
        let id = match_id(&offer, &listing);
        assert!(id.starts_with("0xaaaa"));
        assert!(id.contains(":0xbbbb"));
    }
}
