//! Shared fixtures: order and match builders plus in-memory fakes for every
//! infra seam of the engine.

use {
    crate::{
        broadcast::{Broadcast, BroadcastError, Receipt},
        candidates::{ConduitResolver, FulfillmentData, SeaportApi},
        engine::{EngineConfig, ExecutionEngine},
        executor::Executor,
        info::ContractSet,
        nonces::{self, NonceSource},
        scheduler::BlockJob,
        simulator::ExecutionState,
        state::{BalanceSimulator, StateReader},
    },
    alloy::{rpc::types::TransactionRequest, signers::local::PrivateKeySigner},
    async_trait::async_trait,
    chrono::Utc,
    model::{
        eth::{Address, B256, Block, ChainId, TargetBlock, U256},
        matches::{Match, match_id},
        order::{Maker, Order, OrderId, Side},
        source::OrderSource,
    },
    order_store::OrderStore,
    std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicU64, Ordering},
        },
    },
};

pub fn eth(milli: u64) -> U256 {
    U256::from(milli) * U256::from(10u64).pow(U256::from(15))
}

pub fn contracts() -> ContractSet {
    ContractSet {
        exchange: Address::repeat_byte(0xe1),
        executor: Address::repeat_byte(0xe2),
        initiator: signer().address(),
        wrapped_native: Address::repeat_byte(0xee),
    }
}

pub fn signer() -> PrivateKeySigner {
    // Fixed key so composed transactions are reproducible across runs.
    "0x0000000000000000000000000000000000000000000000000000000000000001"
        .parse()
        .unwrap()
}

fn order(
    byte: u8,
    side: Side,
    source: OrderSource,
    token_id: Option<u64>,
    price_milli: u64,
) -> Order {
    Order {
        id: OrderId::repeat_byte(byte),
        side,
        maker: Maker::User {
            signer: Address::repeat_byte(byte),
            signature: vec![byte].into(),
        },
        currency: contracts().wrapped_native,
        complication: Address::repeat_byte(0xcc),
        collection: Address::repeat_byte(0xc0),
        token_id: token_id.map(U256::from),
        num_items: 1,
        price: eth(price_milli),
        start_time: 0,
        end_time: 0,
        nonce: U256::from(byte),
        max_gas_price: U256::from(20_000_000_000u64),
        source,
        source_order: serde_json::Value::Null,
        gas_usage: if source.is_native() { 0 } else { 300_000 },
    }
}

pub fn native_listing(byte: u8, token_id: u64, price_milli: u64) -> Order {
    order(byte, Side::Listing, OrderSource::Native, Some(token_id), price_milli)
}

pub fn native_offer(byte: u8, token_id: Option<u64>, price_milli: u64) -> Order {
    order(byte, Side::Offer, OrderSource::Native, token_id, price_milli)
}

pub fn seaport_listing(byte: u8, token_id: u64, price_milli: u64) -> Order {
    order(
        byte,
        Side::Listing,
        OrderSource::SeaportV1_5,
        Some(token_id),
        price_milli,
    )
}

pub fn make_match(listing: &Order, offer: &Order) -> Match {
    let is_native = listing.is_native() && offer.is_native();
    Match {
        id: match_id(&offer.id, &listing.id),
        listing: listing.clone(),
        offer: offer.clone(),
        is_native,
        max_gas_price_gwei: offer.max_gas_price_gwei(),
        arbitrage_wei: if is_native {
            U256::ZERO
        } else {
            offer.price - listing.price
        },
        discovered_at: Utc::now(),
    }
}

/// A state where every user order of `matches` is funded: tokens owned by
/// their listers, offer signers hold and approve their price, the executor
/// holds plenty of native coin.
pub fn funded_state(matches: &[Match]) -> ExecutionState {
    let contracts = contracts();
    let mut state = ExecutionState::default();
    state
        .native_balances
        .insert(contracts.executor, eth(100_000));
    for m in matches {
        state.erc721_owners.insert(
            (m.listing.collection, m.listing.token_id.unwrap_or_default()),
            m.listing.signer(),
        );
        let buyer = m.offer.signer();
        let balance = state
            .erc20_balances
            .get(&(m.offer.currency, buyer))
            .copied()
            .unwrap_or_default();
        state
            .erc20_balances
            .insert((m.offer.currency, buyer), balance + m.offer.price);
        let allowance = state
            .erc20_allowances
            .get(&(m.offer.currency, buyer, contracts.exchange))
            .copied()
            .unwrap_or_default();
        state.erc20_allowances.insert(
            (m.offer.currency, buyer, contracts.exchange),
            allowance + m.offer.price,
        );
    }
    state
}

pub struct FakeState(pub ExecutionState);

#[async_trait]
impl StateReader for FakeState {
    async fn erc721_owner(
        &self,
        collection: Address,
        token_id: U256,
        _block: u64,
    ) -> anyhow::Result<Address> {
        Ok(self
            .0
            .erc721_owners
            .get(&(collection, token_id))
            .copied()
            .unwrap_or_default())
    }

    async fn erc20_balance(
        &self,
        token: Address,
        owner: Address,
        _block: u64,
    ) -> anyhow::Result<U256> {
        Ok(self
            .0
            .erc20_balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        _block: u64,
    ) -> anyhow::Result<U256> {
        Ok(self
            .0
            .erc20_allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn native_balance(&self, account: Address, _block: u64) -> anyhow::Result<U256> {
        Ok(self
            .0
            .native_balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }
}

pub struct FakeSeaport;

#[async_trait]
impl SeaportApi for FakeSeaport {
    async fn fulfillment(
        &self,
        _source: OrderSource,
        _source_order: &serde_json::Value,
        _taker: Address,
    ) -> anyhow::Result<FulfillmentData> {
        Ok(FulfillmentData {
            to: Address::repeat_byte(0x5e),
            data: vec![0xab, 0xcd].into(),
            value: U256::ZERO,
        })
    }
}

pub struct FakeConduits;

#[async_trait]
impl ConduitResolver for FakeConduits {
    async fn conduit(&self, _conduit_key: B256) -> anyhow::Result<Address> {
        Ok(Address::repeat_byte(0x77))
    }
}

#[derive(Default)]
pub struct FakeBalances {
    /// Consumed per `intermediary_delta` call; empty means break even.
    pub deltas: Mutex<VecDeque<i128>>,
}

#[async_trait]
impl BalanceSimulator for FakeBalances {
    async fn intermediary_delta(
        &self,
        _tx: &TransactionRequest,
        _block: u64,
    ) -> anyhow::Result<i128> {
        Ok(self.deltas.lock().unwrap().pop_front().unwrap_or(0))
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> anyhow::Result<u64> {
        Ok(500_000)
    }
}

#[derive(Default)]
pub struct FakeBroadcast {
    /// Consumed per broadcast; empty means a successful receipt.
    pub outcomes: Mutex<VecDeque<Result<Receipt, BroadcastError>>>,
    pub sent: Mutex<Vec<TransactionRequest>>,
}

pub fn receipt(success: bool) -> Receipt {
    Receipt {
        success,
        tx_hash: B256::repeat_byte(0x99),
        gas_used: 400_000,
        cumulative_gas_used: 1_000_000,
        effective_gas_price: U256::from(13_000_000_000u64),
        block_hash: B256::repeat_byte(0x88),
        block_number: 102,
    }
}

#[async_trait]
impl Broadcast for FakeBroadcast {
    async fn broadcast(
        &self,
        tx: TransactionRequest,
        _current: &Block,
        _target: &TargetBlock,
    ) -> Result<Receipt, BroadcastError> {
        self.sent.lock().unwrap().push(tx);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(receipt(true)))
    }
}

#[derive(Default)]
pub struct FakeNonces(AtomicU64);

#[async_trait]
impl NonceSource for FakeNonces {
    async fn next(&self) -> Result<U256, nonces::Error> {
        Ok(U256::from(self.0.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

pub struct Harness {
    pub store: OrderStore,
    pub engine: ExecutionEngine,
    pub broadcast: Arc<FakeBroadcast>,
    pub balances: Arc<FakeBalances>,
}

pub fn harness(matches: Vec<Match>, state: ExecutionState) -> Harness {
    let store = OrderStore::new();
    for m in &matches {
        store.put(m.listing.clone(), model::order::OrderStatus::Active);
        store.put(m.offer.clone(), model::order::OrderStatus::Active);
        store.record_match(m.clone());
    }
    let broadcast = Arc::new(FakeBroadcast::default());
    let balances = Arc::new(FakeBalances::default());
    let contracts = contracts();
    let executor = Executor::new(
        contracts,
        ChainId(1),
        signer(),
        Arc::new(FakeNonces::default()),
    );
    // The pool is never reachable in tests; durable-write failures are
    // logged and absorbed.
    let db = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgresql://localhost/unreachable")
        .unwrap();
    let engine = ExecutionEngine::new(
        store.clone(),
        db,
        Arc::new(FakeState(state)),
        Arc::new(FakeSeaport),
        Arc::new(FakeConduits),
        balances.clone(),
        broadcast.clone(),
        executor,
        contracts,
        EngineConfig::default(),
    );
    Harness {
        store,
        engine,
        broadcast,
        balances,
    }
}

/// A job whose target is in the near future, so the engine's start-time
/// guard passes.
pub fn job() -> BlockJob {
    let now = Utc::now().timestamp().max(0) as u64;
    let current = Block {
        number: 100,
        timestamp: now + 10,
        base_fee_per_gas: U256::from(10_000_000_000u64),
    };
    BlockJob {
        id: "1:100".to_string(),
        current,
        target: TargetBlock::project(&current, 2),
    }
}
