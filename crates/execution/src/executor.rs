//! Composing the settlement transaction: encoding a chosen set of matches
//! into one of the executor contract's two call shapes and signing the
//! intermediary's side of brokered matches.

use {
    crate::{
        candidates::Candidate,
        info::ContractSet,
        nonces::NonceSource,
    },
    alloy::{
        network::TransactionBuilder,
        rpc::types::TransactionRequest,
        signers::{Signer, local::PrivateKeySigner},
        sol_types::{SolCall, SolStruct},
    },
    contracts::{
        Batch, ExternalCall, ExternalFulfillments, IMatchExecutor, MakerOrder, MatchOrders,
        OrderItem, SignableOrder, TokenInfo,
    },
    model::{
        eth::{Address, Block, ChainId, TargetBlock, U256},
        matches::{Match, MatchId},
        order::{Order, OrderId, Side},
    },
    thiserror::Error,
};

/// Executor-side orders stay valid this long past the target block, leaving
/// room for one more inclusion attempt.
const EXECUTOR_ORDER_VALIDITY_SECONDS: u64 = 120;

#[derive(Debug, Error)]
pub enum Error {
    #[error("nonce allocation failed: {0}")]
    Nonce(#[from] crate::nonces::Error),
    #[error("signing failed: {0}")]
    Signing(#[from] alloy::signers::Error),
    #[error("fee of {0} wei per gas does not fit the transaction envelope")]
    Fee(U256),
}

/// The settlement transaction for one block attempt, plus what it settles.
#[derive(Debug, Clone)]
pub struct ComposedTx {
    pub request: TransactionRequest,
    pub order_ids: Vec<OrderId>,
    pub match_ids: Vec<MatchId>,
}

pub struct Executor {
    contracts: ContractSet,
    chain_id: ChainId,
    signer: PrivateKeySigner,
    nonces: std::sync::Arc<dyn NonceSource>,
}

impl Executor {
    pub fn new(
        contracts: ContractSet,
        chain_id: ChainId,
        signer: PrivateKeySigner,
        nonces: std::sync::Arc<dyn NonceSource>,
    ) -> Self {
        Self {
            contracts,
            chain_id,
            signer,
            nonces,
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// Encodes `candidates` into a single transaction targeting the
    /// executor contract. Candidate order is preserved; two calls with the
    /// same candidates produce the same calldata modulo executor-order
    /// nonces and signatures.
    pub async fn compose(
        &self,
        candidates: &[Candidate],
        current: &Block,
        target: &TargetBlock,
        priority_fee: U256,
    ) -> Result<ComposedTx, Error> {
        let mut calls = Vec::new();
        let mut nfts_to_transfer = Vec::new();
        let mut matches = Vec::new();
        for candidate in candidates {
            let m = candidate.inner();
            match candidate {
                Candidate::Native(_) => {
                    matches.push(MatchOrders {
                        buys: vec![maker_order(&m.offer)],
                        sells: vec![maker_order(&m.listing)],
                    });
                }
                Candidate::Broker { fulfillment, .. } => {
                    calls.push(ExternalCall {
                        data: fulfillment.data.clone(),
                        value: fulfillment.value,
                        to: fulfillment.to,
                    });
                    nfts_to_transfer.push(OrderItem {
                        collection: m.listing.collection,
                        tokens: vec![TokenInfo {
                            tokenId: m.listing.token_id.unwrap_or_default(),
                            numTokens: U256::from(1),
                        }],
                    });
                    let executor_listing = self.executor_order(m, current, target).await?;
                    matches.push(MatchOrders {
                        buys: vec![maker_order(&m.offer)],
                        sells: vec![executor_listing],
                    });
                }
            }
        }

        let calldata = if calls.is_empty() {
            IMatchExecutor::executeNativeMatchesCall { matches }.abi_encode()
        } else {
            IMatchExecutor::executeBrokerMatchesCall {
                batches: vec![Batch {
                    externalFulfillments: ExternalFulfillments {
                        calls,
                        nftsToTransfer: nfts_to_transfer,
                    },
                    matches,
                }],
            }
            .abi_encode()
        };

        let max_fee = target.base_fee_per_gas + priority_fee;
        let request = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(self.contracts.executor)
            .with_input(calldata)
            .with_chain_id(self.chain_id.0)
            .with_max_fee_per_gas(u128::try_from(max_fee).map_err(|_| Error::Fee(max_fee))?)
            .with_max_priority_fee_per_gas(
                u128::try_from(priority_fee).map_err(|_| Error::Fee(priority_fee))?,
            );

        let order_ids = candidates
            .iter()
            .flat_map(|candidate| candidate.inner().order_ids())
            .collect();
        let match_ids = candidates
            .iter()
            .map(|candidate| candidate.inner().id.clone())
            .collect();
        Ok(ComposedTx {
            request,
            order_ids,
            match_ids,
        })
    }

    /// Builds and signs the intermediary's side of a brokered match: the
    /// offer's price, a fresh exchange nonce, and a validity window from
    /// now until shortly past the target block. The order always sells the
    /// exact token the broker fill acquires — the listing's — even when the
    /// offer taking it is collection-wide.
    async fn executor_order(
        &self,
        m: &Match,
        current: &Block,
        target: &TargetBlock,
    ) -> Result<MakerOrder, Error> {
        let offer = &m.offer;
        let nonce = self.nonces.next().await?;
        let mut order = MakerOrder {
            isSellOrder: offer.side == Side::Offer,
            signer: self.contracts.executor,
            constraints: vec![
                U256::from(1),
                offer.price,
                offer.price,
                U256::from(current.timestamp),
                U256::from(target.timestamp + EXECUTOR_ORDER_VALIDITY_SECONDS),
                nonce,
                U256::ZERO,
            ],
            nfts: vec![OrderItem {
                collection: m.listing.collection,
                tokens: m
                    .listing
                    .token_id
                    .map(|token_id| TokenInfo {
                        tokenId: token_id,
                        numTokens: U256::from(1),
                    })
                    .into_iter()
                    .collect(),
            }],
            execParams: vec![offer.complication, offer.currency],
            extraParams: Default::default(),
            sig: Default::default(),
        };

        let domain = contracts::eip712_domain(self.chain_id.0, self.contracts.exchange);
        let hash = SignableOrder::from(&order).eip712_signing_hash(&domain);
        let signature = self.signer.sign_hash(&hash).await?;
        order.sig = signature.as_bytes().to_vec().into();
        Ok(order)
    }
}

/// The ABI form of a stored user order. The wire payload was validated at
/// admission, so the reconstruction is mechanical.
pub fn maker_order(order: &Order) -> MakerOrder {
    MakerOrder {
        isSellOrder: order.side == Side::Listing,
        signer: order.signer(),
        constraints: vec![
            U256::from(order.num_items),
            order.price,
            order.price,
            U256::from(order.start_time),
            U256::from(order.end_time),
            order.nonce,
            order.max_gas_price,
        ],
        nfts: vec![OrderItem {
            collection: order.collection,
            tokens: order
                .token_id
                .map(|token_id| TokenInfo {
                    tokenId: token_id,
                    numTokens: U256::from(1),
                })
                .into_iter()
                .collect(),
        }],
        execParams: vec![order.complication, order.currency],
        extraParams: Default::default(),
        sig: order
            .signature()
            .cloned()
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            candidates::{Candidate, FulfillmentData},
            tests::setup::{
                FakeNonces, contracts, make_match, native_listing, native_offer,
                seaport_listing, signer,
            },
        },
        alloy::sol_types::SolCall,
        std::sync::Arc,
    };

    #[test]
    fn maker_order_round_trips_the_constraints() {
        let order = native_listing(1, 42, 100);
        let encoded = maker_order(&order);
        assert!(encoded.isSellOrder);
        assert_eq!(encoded.constraints.len(), 7);
        assert_eq!(encoded.constraints[1], order.price);
        assert_eq!(encoded.constraints[2], order.price);
        assert_eq!(encoded.constraints[5], order.nonce);
        assert_eq!(encoded.nfts.len(), 1);
        assert_eq!(encoded.nfts[0].tokens[0].tokenId, U256::from(42));
        assert_eq!(encoded.execParams, vec![order.complication, order.currency]);
    }

    /// A collection-wide offer taking a Seaport listing: the executor's
    /// synthetic sell order must name the listing's token, because that is
    /// the token the broker fill hands over.
    #[tokio::test]
    async fn executor_order_sells_the_listing_token_for_collection_offers() {
        let listing = seaport_listing(1, 42, 1_000);
        let offer = native_offer(2, None, 1_100);
        let m = make_match(&listing, &offer);
        let candidate = Candidate::Broker {
            m: m.clone(),
            fulfillment: FulfillmentData {
                to: Address::repeat_byte(0x5e),
                data: vec![0xab].into(),
                value: U256::ZERO,
            },
            conduit: Address::repeat_byte(0x77),
        };

        let executor = Executor::new(
            contracts(),
            ChainId(1),
            signer(),
            Arc::new(FakeNonces::default()),
        );
        let current = Block {
            number: 100,
            timestamp: 1_700_000_000,
            base_fee_per_gas: U256::from(10_000_000_000u64),
        };
        let target = TargetBlock::project(&current, 2);
        let composed = executor
            .compose(&[candidate], &current, &target, U256::from(3_000_000_000u64))
            .await
            .unwrap();

        let calldata = composed.request.input.input().unwrap();
        let call = IMatchExecutor::executeBrokerMatchesCall::abi_decode(calldata).unwrap();
        let sell = &call.batches[0].matches[0].sells[0];
        assert_eq!(sell.signer, contracts().executor);
        assert_eq!(sell.nfts.len(), 1);
        assert_eq!(sell.nfts[0].collection, listing.collection);
        assert_eq!(sell.nfts[0].tokens.len(), 1);
        assert_eq!(sell.nfts[0].tokens[0].tokenId, U256::from(42));
        // Price and currency still come from the offer being filled.
        assert_eq!(sell.constraints[1], offer.price);
        assert_eq!(sell.execParams[1], offer.currency);
        // The buy side is the user's collection-wide offer, which names no
        // token of its own.
        let buy = &call.batches[0].matches[0].buys[0];
        assert!(buy.nfts[0].tokens.is_empty());
    }
}
