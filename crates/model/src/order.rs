use {
    crate::{
        eth::{Address, Bytes, Gwei, U256},
        source::OrderSource,
    },
    serde::{Deserialize, Serialize},
};

pub use alloy::primitives::B256 as OrderId;

/// Which side of the book an order sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sells a specific token.
    Listing,
    /// Buys a specific token, or any token of a collection.
    Offer,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Listing => Self::Offer,
            Self::Offer => Self::Listing,
        }
    }
}

/// Lifecycle status assigned by the external event stream. Only `Active`
/// orders are eligible for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Inactive,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Who placed the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Maker {
    /// A user order, fully signed at ingest.
    User { signer: Address, signature: Bytes },
    /// The intermediary's side of a brokered match. Signer, nonce, validity
    /// window and price are filled in when the match is composed, so the
    /// ingested form carries none of them.
    MatchExecutor,
}

/// An immutable signed limit order.
///
/// Exactly one collection and at most one token; the price is static
/// (start price equals end price) and `num_items` is always 1 in scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub maker: Maker,
    /// Zero address means the native coin; the configured wrapped-native
    /// address is treated as its ERC-20 form.
    pub currency: Address,
    /// Policy contract consulted by the exchange at settlement. Must equal
    /// the system's configured value for the order to be admitted.
    pub complication: Address,
    pub collection: Address,
    /// `None` for collection-wide offers.
    pub token_id: Option<U256>,
    pub num_items: u64,
    /// Static price in wei (start price == end price).
    pub price: U256,
    /// Unix seconds.
    pub start_time: u64,
    /// Unix seconds; 0 means no expiry.
    pub end_time: u64,
    pub nonce: U256,
    /// The highest gas price at which the maker still wants this order
    /// executed, in wei.
    pub max_gas_price: U256,
    pub source: OrderSource,
    /// Opaque source-marketplace order blob, forwarded untouched.
    pub source_order: serde_json::Value,
    /// Gas the source marketplace's fill is expected to consume.
    pub gas_usage: u64,
}

impl Order {
    pub fn signer(&self) -> Address {
        match &self.maker {
            Maker::User { signer, .. } => *signer,
            Maker::MatchExecutor => Address::ZERO,
        }
    }

    pub fn signature(&self) -> Option<&Bytes> {
        match &self.maker {
            Maker::User { signature, .. } => Some(signature),
            Maker::MatchExecutor => None,
        }
    }

    pub fn is_match_executor_order(&self) -> bool {
        matches!(self.maker, Maker::MatchExecutor)
    }

    pub fn is_native(&self) -> bool {
        self.source.is_native()
    }

    pub fn max_gas_price_gwei(&self) -> Gwei {
        Gwei::from_wei(self.max_gas_price)
    }

    /// Whether the order's validity window contains `timestamp`. An end time
    /// of zero leaves the window open-ended.
    pub fn is_open_at(&self, timestamp: u64) -> bool {
        self.start_time <= timestamp && (self.end_time == 0 || timestamp < self.end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(start: u64, end: u64) -> Order {
        Order {
            id: OrderId::ZERO,
            side: Side::Listing,
            maker: Maker::MatchExecutor,
            currency: Address::ZERO,
            complication: Address::ZERO,
            collection: Address::ZERO,
            token_id: None,
            num_items: 1,
            price: U256::ZERO,
            start_time: start,
            end_time: end,
            nonce: U256::ZERO,
            max_gas_price: U256::ZERO,
            source: OrderSource::Native,
            source_order: serde_json::Value::Null,
            gas_usage: 0,
        }
    }

    #[test]
    fn validity_window() {
        let bounded = order(100, 200);
        assert!(!bounded.is_open_at(99));
        assert!(bounded.is_open_at(100));
        assert!(bounded.is_open_at(199));
        assert!(!bounded.is_open_at(200));

        let open_ended = order(100, 0);
        assert!(open_ended.is_open_at(u64::MAX));
    }

    #[test]
    fn match_executor_orders_have_zero_signer() {
        let order = order(0, 0);
        assert!(order.is_match_executor_order());
        assert_eq!(order.signer(), Address::ZERO);
        assert!(order.signature().is_none());
    }
}
