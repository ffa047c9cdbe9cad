//! What executing a match actually moves on chain, and the target-time
//! validation a match must pass before it may be simulated.

use {
    model::{
        eth::{Address, TargetBlock, U256},
        matches::{Match, MatchId},
        order::{OrderId, Side},
    },
    thiserror::Error,
};

/// Addresses the execution side revolves around.
#[derive(Debug, Clone, Copy)]
pub struct ContractSet {
    /// The exchange the native legs settle at.
    pub exchange: Address,
    /// The match-executor contract that batches settlements and fronts the
    /// broker buys.
    pub executor: Address,
    /// The EOA that signs executor-side orders and the final transaction.
    pub initiator: Address,
    pub wrapped_native: Address,
}

/// One hypothetical asset movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Erc721 {
        collection: Address,
        token_id: U256,
        from: Address,
        to: Address,
    },
    /// An ERC-20 movement pulled by `operator` on behalf of `from`; checks
    /// both balance and allowance.
    Erc20 {
        token: Address,
        from: Address,
        to: Address,
        operator: Address,
        value: U256,
    },
    Native {
        from: Address,
        to: Address,
        value: U256,
    },
}

/// Everything the simulator needs to apply one match: the external
/// marketplace's effects, the exchange settlement's effects, and the order
/// and nonce consumption the settlement implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub match_id: MatchId,
    /// Effects of the source marketplace's fill; empty for native pairs.
    pub non_native: Vec<Transfer>,
    /// Effects of settling at the exchange.
    pub native: Vec<Transfer>,
    /// Order ids the settlement consumes.
    pub order_ids: Vec<OrderId>,
    /// `(account, nonce)` pairs the exchange marks used.
    pub nonces: Vec<(Address, U256)>,
}

impl ExecutionInfo {
    /// Derives the transfers of `m` when included at the target block.
    pub fn new(m: &Match, contracts: &ContractSet) -> Self {
        let listing = &m.listing;
        let offer = &m.offer;
        let token_id = listing.token_id.unwrap_or_default();

        let (non_native, native) = if m.is_native {
            // Both legs settle at the exchange: the token moves to the
            // buyer, the buyer's currency moves to the seller.
            let native = vec![
                Transfer::Erc721 {
                    collection: listing.collection,
                    token_id,
                    from: listing.signer(),
                    to: offer.signer(),
                },
                payment(
                    offer.currency,
                    offer.signer(),
                    listing.signer(),
                    listing.price,
                    contracts.exchange,
                ),
            ];
            (vec![], native)
        } else {
            // The executor contract buys the listing out of its
            // marketplace, then sells it to the offer at the exchange.
            let non_native = vec![
                Transfer::Native {
                    from: contracts.executor,
                    to: listing.signer(),
                    value: listing.price,
                },
                Transfer::Erc721 {
                    collection: listing.collection,
                    token_id,
                    from: listing.signer(),
                    to: contracts.executor,
                },
            ];
            let native = vec![
                Transfer::Erc721 {
                    collection: listing.collection,
                    token_id,
                    from: contracts.executor,
                    to: offer.signer(),
                },
                payment(
                    offer.currency,
                    offer.signer(),
                    contracts.executor,
                    offer.price,
                    contracts.exchange,
                ),
            ];
            (non_native, native)
        };

        Self {
            match_id: m.id.clone(),
            non_native,
            native,
            order_ids: m.order_ids().to_vec(),
            nonces: m.nonces().collect(),
        }
    }
}

fn payment(
    currency: Address,
    from: Address,
    to: Address,
    value: U256,
    operator: Address,
) -> Transfer {
    if currency == Address::ZERO {
        Transfer::Native { from, to, value }
    } else {
        Transfer::Erc20 {
            token: currency,
            from,
            to,
            operator,
            value,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("listing and offer share the signer {0}")]
    SignerCollision(Address),
    #[error("user order {0} is missing its signature")]
    MissingSignature(OrderId),
    #[error("order {0} is on the wrong side")]
    WrongSide(OrderId),
    #[error("orders are on different collections")]
    CollectionMismatch,
    #[error("orders settle in different currencies")]
    CurrencyMismatch,
    #[error("orders use different complications")]
    ComplicationMismatch,
    #[error("order {0} trades more than one item")]
    UnsupportedNumItems(OrderId),
    #[error("offer price {offer} does not cover listing price {listing}")]
    PriceNotCrossed { listing: U256, offer: U256 },
    #[error("order {0} is not open at the target block")]
    OutsideTimeWindow(OrderId),
    #[error("offer tolerates {tolerated} wei per gas, target needs {required}")]
    GasPriceExceeded { tolerated: U256, required: U256 },
}

/// Re-validates a match against the block it would be included in. The
/// matching engine checked prices at discovery time; this is the
/// authoritative check at execution time.
pub fn verify(m: &Match, target: &TargetBlock, max_fee_per_gas: U256) -> Result<(), VerifyError> {
    let listing = &m.listing;
    let offer = &m.offer;

    if listing.side != Side::Listing {
        return Err(VerifyError::WrongSide(listing.id));
    }
    if offer.side != Side::Offer {
        return Err(VerifyError::WrongSide(offer.id));
    }
    for order in [listing, offer] {
        if !order.is_match_executor_order() && order.signature().is_none() {
            return Err(VerifyError::MissingSignature(order.id));
        }
        if order.num_items != 1 {
            return Err(VerifyError::UnsupportedNumItems(order.id));
        }
        if !order.is_open_at(target.timestamp) {
            return Err(VerifyError::OutsideTimeWindow(order.id));
        }
    }
    if listing.signer() == offer.signer() && !listing.is_match_executor_order() {
        return Err(VerifyError::SignerCollision(listing.signer()));
    }
    if listing.collection != offer.collection {
        return Err(VerifyError::CollectionMismatch);
    }
    if m.is_native {
        // Broker matches pay the marketplace in its own currency; only
        // native pairs must agree.
        if listing.currency != offer.currency {
            return Err(VerifyError::CurrencyMismatch);
        }
        if listing.complication != offer.complication {
            return Err(VerifyError::ComplicationMismatch);
        }
    }
    if offer.price < listing.price {
        return Err(VerifyError::PriceNotCrossed {
            listing: listing.price,
            offer: offer.price,
        });
    }
    if offer.max_gas_price < max_fee_per_gas {
        return Err(VerifyError::GasPriceExceeded {
            tolerated: offer.max_gas_price,
            required: max_fee_per_gas,
        });
    }
    Ok(())
}
