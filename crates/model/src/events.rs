use {
    crate::{
        eth::{Address, Bytes, ChainId, U256},
        order::{OrderId, OrderStatus},
        source::OrderSource,
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_with::{DisplayFromStr, serde_as},
};

/// Position in the order-event stream, persisted per (chain, collection).
///
/// Events are totally ordered by `(timestamp, event_id)`; timestamp ties are
/// broken by the event id, so resuming strictly after a cursor never replays
/// or skips an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub order_id: OrderId,
    pub event_id: String,
}

impl Cursor {
    /// The stream ordering key.
    pub fn position(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, &self.event_id)
    }

    /// The cursor a snapshot bootstrap leaves behind. A snapshot reflects
    /// every event up to and including its advertised timestamp, so the
    /// event id is a sentinel above any real id: strict-greater paging then
    /// skips timestamp ties the snapshot already contains.
    pub fn snapshot_boundary(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            order_id: OrderId::ZERO,
            event_id: "\u{10FFFF}".to_string(),
        }
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.position().cmp(&other.position())
    }
}

/// Whether an event record was appended or rewritten in place. The stream's
/// most-recent-event documents are assumed immutable, so `Modified` records
/// indicate an upstream bug and are logged but not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderEventKind {
    Added,
    Modified,
}

/// One record of the upstream order-event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub id: String,
    pub order_id: OrderId,
    pub kind: OrderEventKind,
    pub status: OrderStatus,
    pub order: OrderPayload,
    pub source: OrderSource,
    pub source_order: serde_json::Value,
    pub gas_usage: u64,
    pub collection: Address,
    pub timestamp: DateTime<Utc>,
}

impl OrderEvent {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            timestamp: self.timestamp,
            order_id: self.order_id,
            event_id: self.id.clone(),
        }
    }
}

/// Wire form of a signed order body, as carried by both the event stream and
/// snapshot blobs. Mirrors the exchange ABI's maker order: the constraints
/// array is `[num_items, start_price, end_price, start_time, end_time,
/// nonce, max_gas_price]`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub is_sell_order: bool,
    pub signer: Address,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub constraints: Vec<U256>,
    pub nfts: Vec<NftPayload>,
    /// `[complication, currency]`.
    pub exec_params: [Address; 2],
    pub extra_params: Bytes,
    pub sig: Bytes,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftPayload {
    pub collection: Address,
    pub tokens: Vec<TokenPayload>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde_as(as = "DisplayFromStr")]
    pub token_id: U256,
    pub num_tokens: u64,
}

impl OrderPayload {
    pub const CONSTRAINT_COUNT: usize = 7;

    pub fn num_items(&self) -> Option<U256> {
        self.constraints.first().copied()
    }

    pub fn start_price(&self) -> Option<U256> {
        self.constraints.get(1).copied()
    }

    pub fn end_price(&self) -> Option<U256> {
        self.constraints.get(2).copied()
    }

    pub fn start_time(&self) -> Option<U256> {
        self.constraints.get(3).copied()
    }

    pub fn end_time(&self) -> Option<U256> {
        self.constraints.get(4).copied()
    }

    pub fn nonce(&self) -> Option<U256> {
        self.constraints.get(5).copied()
    }

    pub fn max_gas_price(&self) -> Option<U256> {
        self.constraints.get(6).copied()
    }

    pub fn complication(&self) -> Address {
        self.exec_params[0]
    }

    pub fn currency(&self) -> Address {
        self.exec_params[1]
    }
}

/// One line of a snapshot blob (newline-delimited JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub id: OrderId,
    pub order: OrderPayload,
    pub source: OrderSource,
    pub source_order: serde_json::Value,
    pub gas_usage: u64,
}

/// Metadata document advertising the most recent snapshot of a collection.
/// `timestamp` is the upper bound the snapshot reflects, so tailing can
/// safely start strictly after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub bucket: String,
    pub file: String,
    pub chain_id: ChainId,
    pub collection: Address,
    pub num_orders: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_orders_by_timestamp_then_event_id() {
        let cursor = |secs, id: &str| Cursor {
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            order_id: OrderId::ZERO,
            event_id: id.to_string(),
        };
        assert!(cursor(1, "b") < cursor(2, "a"));
        assert!(cursor(2, "a") < cursor(2, "b"));
        assert_eq!(cursor(2, "a"), cursor(2, "a"));
    }

    #[test]
    fn snapshot_boundary_sits_above_timestamp_ties() {
        let timestamp = DateTime::from_timestamp(100, 0).unwrap();
        let boundary = Cursor::snapshot_boundary(timestamp);
        let tie = Cursor {
            timestamp,
            order_id: OrderId::ZERO,
            event_id: "zzzz".to_string(),
        };
        let later = Cursor {
            timestamp: DateTime::from_timestamp(101, 0).unwrap(),
            order_id: OrderId::ZERO,
            event_id: "aaaa".to_string(),
        };
        assert!(tie < boundary);
        assert!(boundary < later);
    }

    #[test]
    fn order_payload_round_trips() {
        let json = serde_json::json!({
            "isSellOrder": true,
            "signer": "0x00000000000000000000000000000000000000aa",
            "constraints": ["1", "100000000000000000", "100000000000000000",
                            "1700000000", "0", "7", "20000000000"],
            "nfts": [{
                "collection": "0x00000000000000000000000000000000000000bb",
                "tokens": [{"tokenId": "42", "numTokens": 1}],
            }],
            "execParams": [
                "0x00000000000000000000000000000000000000cc",
                "0x0000000000000000000000000000000000000000",
            ],
            "extraParams": "0x",
            "sig": "0x1234",
        });
        let payload: OrderPayload = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(payload.num_items(), Some(U256::from(1)));
        assert_eq!(payload.nonce(), Some(U256::from(7)));
        assert_eq!(payload.currency(), Address::ZERO);
        assert_eq!(serde_json::to_value(&payload).unwrap(), json);
    }
}
