//! Chain-state access for the engine: the batched initial-state load that
//! seeds the simulator, and the chain-side balance-change simulation of a
//! composed transaction.

use {
    crate::{
        info::{ExecutionInfo, Transfer},
        simulator::ExecutionState,
    },
    alloy::{
        providers::Provider,
        rpc::types::{
            TransactionRequest,
            simulate::{SimBlock, SimulatePayload},
        },
        sol_types::SolEvent,
    },
    async_trait::async_trait,
    ethrpc::Rpc,
    futures::{StreamExt, stream},
    model::eth::{Address, U256},
    std::collections::BTreeSet,
};

/// Concurrency of the initial-state load. The reads are tiny and the node
/// can take a lot of them at once.
pub const LOAD_CONCURRENCY: usize = 800;

/// Point reads of chain state at a pinned block.
#[async_trait]
pub trait StateReader: Send + Sync + 'static {
    async fn erc721_owner(
        &self,
        collection: Address,
        token_id: U256,
        block: u64,
    ) -> anyhow::Result<Address>;
    async fn erc20_balance(
        &self,
        token: Address,
        owner: Address,
        block: u64,
    ) -> anyhow::Result<U256>;
    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        block: u64,
    ) -> anyhow::Result<U256>;
    async fn native_balance(&self, account: Address, block: u64) -> anyhow::Result<U256>;
}

/// One deduplicated read of the initial-state load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StateKey {
    Erc721Owner(Address, U256),
    Erc20Balance(Address, Address),
    Erc20Allowance(Address, Address, Address),
    Native(Address),
}

/// Collects every read the union of `infos` needs. Credits materialize
/// accounts on the fly, so only debit sides and owners are loaded.
fn state_keys(infos: &[ExecutionInfo]) -> BTreeSet<StateKey> {
    let mut keys = BTreeSet::new();
    let transfers = infos
        .iter()
        .flat_map(|info| info.non_native.iter().chain(&info.native));
    for transfer in transfers {
        match transfer {
            Transfer::Erc721 {
                collection,
                token_id,
                ..
            } => {
                keys.insert(StateKey::Erc721Owner(*collection, *token_id));
            }
            Transfer::Erc20 {
                token,
                from,
                operator,
                ..
            } => {
                keys.insert(StateKey::Erc20Balance(*token, *from));
                if operator != from {
                    keys.insert(StateKey::Erc20Allowance(*token, *from, *operator));
                }
            }
            Transfer::Native { from, .. } => {
                keys.insert(StateKey::Native(*from));
            }
        }
    }
    keys
}

/// Loads the execution state the union of `infos` touches, at `block`.
/// Reads run with bounded concurrency; any failed read fails the load.
pub async fn load_initial_state(
    reader: &dyn StateReader,
    infos: &[ExecutionInfo],
    block: u64,
) -> anyhow::Result<ExecutionState> {
    enum Loaded {
        Owner((Address, U256), Address),
        Balance((Address, Address), U256),
        Allowance((Address, Address, Address), U256),
        Native(Address, U256),
    }

    let keys = state_keys(infos);
    let mut loads = stream::iter(keys.into_iter().map(|key| async move {
        anyhow::Ok(match key {
            StateKey::Erc721Owner(collection, token_id) => Loaded::Owner(
                (collection, token_id),
                reader.erc721_owner(collection, token_id, block).await?,
            ),
            StateKey::Erc20Balance(token, owner) => Loaded::Balance(
                (token, owner),
                reader.erc20_balance(token, owner, block).await?,
            ),
            StateKey::Erc20Allowance(token, owner, spender) => Loaded::Allowance(
                (token, owner, spender),
                reader.erc20_allowance(token, owner, spender, block).await?,
            ),
            StateKey::Native(account) => {
                Loaded::Native(account, reader.native_balance(account, block).await?)
            }
        })
    }))
    .buffer_unordered(LOAD_CONCURRENCY);

    let mut state = ExecutionState::default();
    while let Some(loaded) = loads.next().await {
        match loaded? {
            Loaded::Owner(key, owner) => {
                state.erc721_owners.insert(key, owner);
            }
            Loaded::Balance(key, balance) => {
                state.erc20_balances.insert(key, balance);
            }
            Loaded::Allowance(key, allowance) => {
                state.erc20_allowances.insert(key, allowance);
            }
            Loaded::Native(account, balance) => {
                state.native_balances.insert(account, balance);
            }
        }
    }
    Ok(state)
}

/// [`StateReader`] against a live node.
pub struct EthStateReader {
    rpc: Rpc,
}

impl EthStateReader {
    pub fn new(rpc: Rpc) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl StateReader for EthStateReader {
    async fn erc721_owner(
        &self,
        collection: Address,
        token_id: U256,
        block: u64,
    ) -> anyhow::Result<Address> {
        Ok(ethrpc::state::erc721_owner(&self.rpc, collection, token_id, block).await?)
    }

    async fn erc20_balance(
        &self,
        token: Address,
        owner: Address,
        block: u64,
    ) -> anyhow::Result<U256> {
        Ok(ethrpc::state::erc20_balance(&self.rpc, token, owner, block).await?)
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        block: u64,
    ) -> anyhow::Result<U256> {
        Ok(ethrpc::state::erc20_allowance(&self.rpc, token, owner, spender, block).await?)
    }

    async fn native_balance(&self, account: Address, block: u64) -> anyhow::Result<U256> {
        Ok(ethrpc::state::native_balance(&self.rpc, account, block).await?)
    }
}

/// Chain-side validation of a composed transaction: what would it actually
/// move, and does the whole attempt gas-estimate cleanly.
#[async_trait]
pub trait BalanceSimulator: Send + Sync + 'static {
    /// Net wei (native plus wrapped native) the intermediary gains from
    /// executing `tx` on top of `block`, excluding the gas bill.
    async fn intermediary_delta(
        &self,
        tx: &TransactionRequest,
        block: u64,
    ) -> anyhow::Result<i128>;

    /// `eth_estimateGas` for `tx`; an error means the transaction reverts.
    async fn estimate_gas(&self, tx: &TransactionRequest) -> anyhow::Result<u64>;
}

/// `eth_simulateV1` with transfer tracing: native movements surface as
/// synthetic transfer logs, wrapped-native movements as ordinary ERC-20
/// transfer events, and both are summed over the intermediary's addresses.
pub struct EthBalanceSimulator {
    rpc: Rpc,
    wrapped_native: Address,
    intermediary: Vec<Address>,
}

/// The pseudo-address `eth_simulateV1` attributes traced native transfers
/// to.
const NATIVE_TRANSFER_SOURCE: Address = Address::new([
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xfe,
]);

impl EthBalanceSimulator {
    pub fn new(rpc: Rpc, wrapped_native: Address, intermediary: Vec<Address>) -> Self {
        Self {
            rpc,
            wrapped_native,
            intermediary,
        }
    }
}

#[async_trait]
impl BalanceSimulator for EthBalanceSimulator {
    async fn intermediary_delta(
        &self,
        tx: &TransactionRequest,
        block: u64,
    ) -> anyhow::Result<i128> {
        let payload = SimulatePayload {
            block_state_calls: vec![SimBlock {
                block_overrides: None,
                state_overrides: None,
                calls: vec![tx.clone()],
            }],
            trace_transfers: true,
            validation: false,
            return_full_transactions: false,
        };
        let simulated = self
            .rpc
            .provider()
            .simulate(&payload)
            .number(block)
            .await?;

        let mut delta = 0i128;
        let transfer_topic = contracts::IERC20::Transfer::SIGNATURE_HASH;
        let deposit_topic = contracts::IWrappedNative::Deposit::SIGNATURE_HASH;
        let withdrawal_topic = contracts::IWrappedNative::Withdrawal::SIGNATURE_HASH;
        for block in &simulated {
            for call in &block.calls {
                anyhow::ensure!(
                    call.status,
                    "simulated call reverted: {:?}",
                    call.error.as_ref().map(|err| err.message.clone())
                );
                for log in &call.logs {
                    let is_native = log.address() == NATIVE_TRANSFER_SOURCE;
                    if !is_native && log.address() != self.wrapped_native {
                        continue;
                    }
                    let topics = log.topics();
                    let value = i128::try_from(
                        U256::try_from_be_slice(log.data().data.as_ref()).unwrap_or_default(),
                    )
                    .unwrap_or(i128::MAX);
                    match topics.first() {
                        Some(topic) if *topic == transfer_topic && topics.len() >= 3 => {
                            let from = Address::from_word(topics[1]);
                            let to = Address::from_word(topics[2]);
                            if self.intermediary.contains(&to) {
                                delta += value;
                            }
                            if self.intermediary.contains(&from) {
                                delta -= value;
                            }
                        }
                        // Wrap/unwrap emits no ERC-20 transfer; the
                        // deposit/withdrawal event carries the token-side
                        // half, the traced native movement the other.
                        Some(topic) if *topic == deposit_topic && topics.len() >= 2 => {
                            if self.intermediary.contains(&Address::from_word(topics[1])) {
                                delta += value;
                            }
                        }
                        Some(topic) if *topic == withdrawal_topic && topics.len() >= 2 => {
                            if self.intermediary.contains(&Address::from_word(topics[1])) {
                                delta -= value;
                            }
                        }
                        _ => (),
                    }
                }
            }
        }
        Ok(delta)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> anyhow::Result<u64> {
        Ok(self.rpc.provider().estimate_gas(tx.clone()).await?)
    }
}
