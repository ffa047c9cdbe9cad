//! Whether an incoming order is representable at all. Orders failing
//! admission are dropped with a log line and never retried; they are orders
//! the system intentionally refuses.

use {
    model::{
        eth::{Address, U256},
        events::OrderPayload,
        order::{Maker, Order, OrderId, Side},
        source::OrderSource,
    },
    thiserror::Error,
};

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// The only policy contract the exchange is configured to accept.
    pub complication: Address,
    /// The chain's wrapped-native token.
    pub wrapped_native: Address,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("constraints array has {0} entries, expected 7")]
    MalformedConstraints(usize),
    #[error("order names {0} collections, expected exactly one")]
    NotOneCollection(usize),
    #[error("order names {0} tokens, expected at most one")]
    TooManyTokens(usize),
    #[error("order trades {0} units of one token, only single ERC-721 tokens are supported")]
    NotErc721(u64),
    #[error("order trades {0} items, expected 1")]
    UnsupportedNumItems(U256),
    #[error("start price {start} differs from end price {end}, dynamic pricing is unsupported")]
    DynamicPrice { start: U256, end: U256 },
    #[error("extra params must be empty")]
    NonzeroExtraParams,
    #[error("complication {0} is not allowed")]
    DisallowedComplication(Address),
    #[error("currency {0} is neither the native coin nor the wrapped native token")]
    UnsupportedCurrency(Address),
    #[error("user order is missing its signature")]
    MissingSignature,
    #[error("user order has a zero signer")]
    ZeroSigner,
    #[error("a match-executor order can only come from the native source")]
    NonNativeMatchExecutorOrder,
}

/// Validates a wire payload and converts it into the canonical [`Order`].
pub fn admit(
    config: &AdmissionConfig,
    id: OrderId,
    payload: &OrderPayload,
    source: OrderSource,
    source_order: serde_json::Value,
    gas_usage: u64,
) -> Result<Order, AdmissionError> {
    if payload.constraints.len() != OrderPayload::CONSTRAINT_COUNT {
        return Err(AdmissionError::MalformedConstraints(
            payload.constraints.len(),
        ));
    }
    let [nft] = payload.nfts.as_slice() else {
        return Err(AdmissionError::NotOneCollection(payload.nfts.len()));
    };
    if nft.tokens.len() > 1 {
        return Err(AdmissionError::TooManyTokens(nft.tokens.len()));
    }
    if let Some(token) = nft.tokens.first()
        && token.num_tokens != 1
    {
        return Err(AdmissionError::NotErc721(token.num_tokens));
    }

    let num_items = payload.num_items().unwrap_or_default();
    if num_items != U256::from(1) {
        return Err(AdmissionError::UnsupportedNumItems(num_items));
    }
    let (start, end) = (
        payload.start_price().unwrap_or_default(),
        payload.end_price().unwrap_or_default(),
    );
    if start != end {
        return Err(AdmissionError::DynamicPrice { start, end });
    }
    if !payload.extra_params.is_empty() && payload.extra_params.iter().any(|byte| *byte != 0) {
        return Err(AdmissionError::NonzeroExtraParams);
    }
    if payload.complication() != config.complication {
        return Err(AdmissionError::DisallowedComplication(
            payload.complication(),
        ));
    }
    let currency = payload.currency();
    if currency != Address::ZERO && currency != config.wrapped_native {
        return Err(AdmissionError::UnsupportedCurrency(currency));
    }

    let maker = if payload.signer == Address::ZERO {
        if !source.is_native() {
            return Err(AdmissionError::NonNativeMatchExecutorOrder);
        }
        Maker::MatchExecutor
    } else {
        if payload.sig.is_empty() {
            return Err(AdmissionError::MissingSignature);
        }
        Maker::User {
            signer: payload.signer,
            signature: payload.sig.clone(),
        }
    };

    Ok(Order {
        id,
        side: if payload.is_sell_order {
            Side::Listing
        } else {
            Side::Offer
        },
        maker,
        currency,
        complication: payload.complication(),
        collection: nft.collection,
        token_id: nft.tokens.first().map(|token| token.token_id),
        num_items: 1,
        price: start,
        start_time: to_u64(payload.start_time().unwrap_or_default()),
        end_time: to_u64(payload.end_time().unwrap_or_default()),
        nonce: payload.nonce().unwrap_or_default(),
        max_gas_price: payload.max_gas_price().unwrap_or_default(),
        source,
        source_order,
        gas_usage,
    })
}

fn to_u64(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use {super::*, model::events::{NftPayload, TokenPayload}};

    fn config() -> AdmissionConfig {
        AdmissionConfig {
            complication: Address::repeat_byte(0xcc),
            wrapped_native: Address::repeat_byte(0xee),
        }
    }

    fn payload() -> OrderPayload {
        OrderPayload {
            is_sell_order: true,
            signer: Address::repeat_byte(0xaa),
            constraints: vec![
                U256::from(1),
                U256::from(100),
                U256::from(100),
                U256::from(1_700_000_000u64),
                U256::ZERO,
                U256::from(7),
                U256::from(20_000_000_000u64),
            ],
            nfts: vec![NftPayload {
                collection: Address::repeat_byte(0xbb),
                tokens: vec![TokenPayload {
                    token_id: U256::from(42),
                    num_tokens: 1,
                }],
            }],
            exec_params: [Address::repeat_byte(0xcc), Address::ZERO],
            extra_params: Default::default(),
            sig: vec![0x01].into(),
        }
    }

    fn admit_payload(payload: &OrderPayload) -> Result<Order, AdmissionError> {
        admit(
            &config(),
            OrderId::repeat_byte(0x11),
            payload,
            OrderSource::Native,
            serde_json::Value::Null,
            0,
        )
    }

    #[test]
    fn admits_a_well_formed_listing() {
        let order = admit_payload(&payload()).unwrap();
        assert_eq!(order.side, Side::Listing);
        assert_eq!(order.token_id, Some(U256::from(42)));
        assert_eq!(order.price, U256::from(100));
        assert_eq!(order.end_time, 0);
        assert!(!order.is_match_executor_order());
    }

    #[test]
    fn refuses_dynamic_pricing() {
        let mut bad = payload();
        bad.constraints[2] = U256::from(200);
        assert_eq!(
            admit_payload(&bad),
            Err(AdmissionError::DynamicPrice {
                start: U256::from(100),
                end: U256::from(200),
            })
        );
    }

    #[test]
    fn refuses_multiple_collections_and_tokens() {
        let mut bad = payload();
        bad.nfts.push(bad.nfts[0].clone());
        assert_eq!(admit_payload(&bad), Err(AdmissionError::NotOneCollection(2)));

        let mut bad = payload();
        bad.nfts[0].tokens.push(TokenPayload {
            token_id: U256::from(43),
            num_tokens: 1,
        });
        assert_eq!(admit_payload(&bad), Err(AdmissionError::TooManyTokens(2)));
    }

    #[test]
    fn refuses_erc1155_style_quantities() {
        let mut bad = payload();
        bad.nfts[0].tokens[0].num_tokens = 5;
        assert_eq!(admit_payload(&bad), Err(AdmissionError::NotErc721(5)));
    }

    #[test]
    fn refuses_unknown_complication_and_currency() {
        let mut bad = payload();
        bad.exec_params[0] = Address::repeat_byte(0x99);
        assert!(matches!(
            admit_payload(&bad),
            Err(AdmissionError::DisallowedComplication(_))
        ));

        let mut bad = payload();
        bad.exec_params[1] = Address::repeat_byte(0x99);
        assert!(matches!(
            admit_payload(&bad),
            Err(AdmissionError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn wrapped_native_is_an_accepted_currency() {
        let mut ok = payload();
        ok.exec_params[1] = config().wrapped_native;
        assert!(admit_payload(&ok).is_ok());
    }

    #[test]
    fn unsigned_user_orders_are_refused() {
        let mut bad = payload();
        bad.sig = Default::default();
        assert_eq!(admit_payload(&bad), Err(AdmissionError::MissingSignature));
    }

    #[test]
    fn zero_signer_is_a_match_executor_order_only_for_native() {
        let mut executor = payload();
        executor.signer = Address::ZERO;
        executor.sig = Default::default();
        let order = admit_payload(&executor).unwrap();
        assert!(order.is_match_executor_order());

        let result = admit(
            &config(),
            OrderId::repeat_byte(0x11),
            &executor,
            OrderSource::SeaportV1_5,
            serde_json::Value::Null,
            0,
        );
        assert_eq!(result, Err(AdmissionError::NonNativeMatchExecutorOrder));
    }
}
