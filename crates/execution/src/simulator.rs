//! A pure state machine over synthetic token balances. It applies the
//! hypothetical transfers of candidate matches and rejects the first one
//! that would under-fund an account, move a token its sender no longer
//! owns, or consume an order or nonce twice. No I/O.

use {
    crate::info::{ExecutionInfo, Transfer},
    model::{
        eth::{Address, U256},
        order::OrderId,
    },
    std::collections::{HashMap, HashSet},
    thiserror::Error,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    #[error("{from} no longer owns token {token_id} of {collection}")]
    InsufficientErc721Balance {
        collection: Address,
        token_id: U256,
        from: Address,
    },
    #[error("{from} holds less than {value} of {token}")]
    InsufficientErc20Balance {
        token: Address,
        from: Address,
        value: U256,
    },
    #[error("{operator} may move less than {value} of {from}'s {token}")]
    InsufficientErc20Allowance {
        token: Address,
        from: Address,
        operator: Address,
        value: U256,
    },
    #[error("{from} holds less than {value} wei")]
    InsufficientNativeBalance { from: Address, value: U256 },
    #[error("order {0} was already executed")]
    OrderExecuted(OrderId),
    #[error("nonce {nonce} of {account} was already executed")]
    NonceExecuted { account: Address, nonce: U256 },
    #[error("no state was loaded for {0}")]
    MissingState(String),
}

impl SimulationError {
    /// Every simulator failure may become valid in a later block once other
    /// participants act.
    pub fn is_transient(&self) -> bool {
        true
    }
}

/// The synthetic chain state one block attempt runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionState {
    pub erc721_owners: HashMap<(Address, U256), Address>,
    pub erc20_balances: HashMap<(Address, Address), U256>,
    /// `(token, owner, operator) -> allowance`.
    pub erc20_allowances: HashMap<(Address, Address, Address), U256>,
    pub native_balances: HashMap<Address, U256>,
    pub executed_orders: HashSet<OrderId>,
    pub executed_nonces: HashSet<(Address, U256)>,
}

pub struct Simulator {
    snapshot: ExecutionState,
    state: ExecutionState,
}

impl Simulator {
    pub fn new(initial: ExecutionState) -> Self {
        Self {
            state: initial.clone(),
            snapshot: initial,
        }
    }

    /// Reverts to the state the simulator was constructed with.
    pub fn reset(&mut self) {
        self.state = self.snapshot.clone();
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Applies the external marketplace's effects of one match. A failure
    /// leaves the state exactly as before the call.
    pub fn apply_non_native(&mut self, info: &ExecutionInfo) -> Result<(), SimulationError> {
        self.apply(|state| {
            for transfer in &info.non_native {
                state.transfer(transfer)?;
            }
            Ok(())
        })
    }

    /// Applies the exchange settlement of one match: the native transfers,
    /// then order-id consumption, then nonce consumption. A failure leaves
    /// the state exactly as before the call.
    pub fn apply_native(&mut self, info: &ExecutionInfo) -> Result<(), SimulationError> {
        self.apply(|state| {
            for transfer in &info.native {
                state.transfer(transfer)?;
            }
            for order_id in &info.order_ids {
                if !state.executed_orders.insert(*order_id) {
                    return Err(SimulationError::OrderExecuted(*order_id));
                }
            }
            for (account, nonce) in &info.nonces {
                if !state.executed_nonces.insert((*account, *nonce)) {
                    return Err(SimulationError::NonceExecuted {
                        account: *account,
                        nonce: *nonce,
                    });
                }
            }
            Ok(())
        })
    }

    /// Applies the whole match at once.
    pub fn simulate(&mut self, info: &ExecutionInfo) -> Result<(), SimulationError> {
        self.apply(|state| {
            for transfer in info.non_native.iter().chain(&info.native) {
                state.transfer(transfer)?;
            }
            for order_id in &info.order_ids {
                if !state.executed_orders.insert(*order_id) {
                    return Err(SimulationError::OrderExecuted(*order_id));
                }
            }
            for (account, nonce) in &info.nonces {
                if !state.executed_nonces.insert((*account, *nonce)) {
                    return Err(SimulationError::NonceExecuted {
                        account: *account,
                        nonce: *nonce,
                    });
                }
            }
            Ok(())
        })
    }

    /// Runs `operation` on a scratch copy and commits only on success, so
    /// one rejected match never leaves partial effects behind.
    fn apply(
        &mut self,
        operation: impl FnOnce(&mut ExecutionState) -> Result<(), SimulationError>,
    ) -> Result<(), SimulationError> {
        let mut scratch = self.state.clone();
        operation(&mut scratch)?;
        self.state = scratch;
        Ok(())
    }
}

impl ExecutionState {
    fn transfer(&mut self, transfer: &Transfer) -> Result<(), SimulationError> {
        match transfer {
            Transfer::Erc721 {
                collection,
                token_id,
                from,
                to,
            } => {
                let owner = self
                    .erc721_owners
                    .get_mut(&(*collection, *token_id))
                    .ok_or_else(|| {
                        SimulationError::MissingState(format!(
                            "owner of {collection}/{token_id}"
                        ))
                    })?;
                if owner != from {
                    return Err(SimulationError::InsufficientErc721Balance {
                        collection: *collection,
                        token_id: *token_id,
                        from: *from,
                    });
                }
                *owner = *to;
            }
            Transfer::Erc20 {
                token,
                from,
                to,
                operator,
                value,
            } => {
                let balance =
                    self.erc20_balances
                        .get(&(*token, *from))
                        .copied()
                        .ok_or_else(|| {
                            SimulationError::MissingState(format!("{token} balance of {from}"))
                        })?;
                if balance < *value {
                    return Err(SimulationError::InsufficientErc20Balance {
                        token: *token,
                        from: *from,
                        value: *value,
                    });
                }
                if operator != from {
                    let allowance = self
                        .erc20_allowances
                        .get(&(*token, *from, *operator))
                        .copied()
                        .ok_or_else(|| {
                            SimulationError::MissingState(format!(
                                "{token} allowance of {from} for {operator}"
                            ))
                        })?;
                    if allowance < *value {
                        return Err(SimulationError::InsufficientErc20Allowance {
                            token: *token,
                            from: *from,
                            operator: *operator,
                            value: *value,
                        });
                    }
                    self.erc20_allowances
                        .insert((*token, *from, *operator), allowance - value);
                }
                self.erc20_balances.insert((*token, *from), balance - value);
                let credited = self
                    .erc20_balances
                    .get(&(*token, *to))
                    .copied()
                    .unwrap_or_default();
                self.erc20_balances.insert((*token, *to), credited + value);
            }
            Transfer::Native { from, to, value } => {
                let balance = self.native_balances.get(from).copied().ok_or_else(|| {
                    SimulationError::MissingState(format!("native balance of {from}"))
                })?;
                if balance < *value {
                    return Err(SimulationError::InsufficientNativeBalance {
                        from: *from,
                        value: *value,
                    });
                }
                self.native_balances.insert(*from, balance - value);
                let credited = self.native_balances.get(to).copied().unwrap_or_default();
                self.native_balances.insert(*to, credited + value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn state() -> ExecutionState {
        let collection = addr(0xc0);
        let weth = addr(0xee);
        let mut state = ExecutionState::default();
        state.erc721_owners.insert((collection, U256::from(1)), addr(1));
        state
            .erc20_balances
            .insert((weth, addr(2)), U256::from(1_000));
        state
            .erc20_allowances
            .insert((weth, addr(2), addr(0xe0)), U256::from(500));
        state.native_balances.insert(addr(3), U256::from(1_000));
        state
    }

    fn erc20(from: u8, to: u8, value: u64) -> Transfer {
        Transfer::Erc20 {
            token: addr(0xee),
            from: addr(from),
            to: addr(to),
            operator: addr(0xe0),
            value: U256::from(value),
        }
    }

    fn info(transfers: Vec<Transfer>) -> ExecutionInfo {
        ExecutionInfo {
            match_id: "m".to_string(),
            non_native: vec![],
            native: transfers,
            order_ids: vec![],
            nonces: vec![],
        }
    }

    #[test]
    fn transfers_conserve_balances() {
        let mut simulator = Simulator::new(state());
        simulator
            .apply_native(&info(vec![
                erc20(2, 4, 300),
                Transfer::Native {
                    from: addr(3),
                    to: addr(5),
                    value: U256::from(250),
                },
            ]))
            .unwrap();

        let state = simulator.state();
        assert_eq!(
            state.erc20_balances[&(addr(0xee), addr(2))],
            U256::from(700)
        );
        assert_eq!(
            state.erc20_balances[&(addr(0xee), addr(4))],
            U256::from(300)
        );
        assert_eq!(
            state.erc20_allowances[&(addr(0xee), addr(2), addr(0xe0))],
            U256::from(200)
        );
        assert_eq!(state.native_balances[&addr(3)], U256::from(750));
        assert_eq!(state.native_balances[&addr(5)], U256::from(250));
    }

    #[test]
    fn failure_rolls_back_the_whole_call() {
        let mut simulator = Simulator::new(state());
        let before = simulator.state().clone();
        // First transfer would succeed, second overdraws: nothing of the
        // call may stick.
        let result = simulator.apply_native(&info(vec![erc20(2, 4, 300), erc20(2, 4, 800)]));
        assert_eq!(
            result,
            Err(SimulationError::InsufficientErc20Balance {
                token: addr(0xee),
                from: addr(2),
                value: U256::from(800),
            })
        );
        assert_eq!(simulator.state(), &before);
    }

    #[test]
    fn allowance_binds_before_balance() {
        let mut simulator = Simulator::new(state());
        // Balance of 1000 covers 600, the 500 allowance does not.
        let result = simulator.apply_native(&info(vec![erc20(2, 4, 600)]));
        assert!(matches!(
            result,
            Err(SimulationError::InsufficientErc20Allowance { .. })
        ));
    }

    #[test]
    fn erc721_moves_follow_ownership() {
        let collection = addr(0xc0);
        let mut simulator = Simulator::new(state());
        let steal = Transfer::Erc721 {
            collection,
            token_id: U256::from(1),
            from: addr(9),
            to: addr(2),
        };
        assert!(matches!(
            simulator.apply_native(&info(vec![steal])),
            Err(SimulationError::InsufficientErc721Balance { .. })
        ));

        let legitimate = Transfer::Erc721 {
            collection,
            token_id: U256::from(1),
            from: addr(1),
            to: addr(2),
        };
        simulator.apply_native(&info(vec![legitimate])).unwrap();
        assert_eq!(
            simulator.state().erc721_owners[&(collection, U256::from(1))],
            addr(2)
        );
    }

    #[test]
    fn orders_and_nonces_consume_once() {
        let mut simulator = Simulator::new(state());
        let consuming = ExecutionInfo {
            match_id: "m".to_string(),
            non_native: vec![],
            native: vec![],
            order_ids: vec![OrderId::repeat_byte(0x01)],
            nonces: vec![(addr(2), U256::from(7))],
        };
        simulator.apply_native(&consuming).unwrap();
        assert_eq!(
            simulator.apply_native(&consuming),
            Err(SimulationError::OrderExecuted(OrderId::repeat_byte(0x01)))
        );

        let replay_nonce = ExecutionInfo {
            order_ids: vec![OrderId::repeat_byte(0x02)],
            ..consuming.clone()
        };
        assert_eq!(
            simulator.apply_native(&replay_nonce),
            Err(SimulationError::NonceExecuted {
                account: addr(2),
                nonce: U256::from(7),
            })
        );
    }

    #[test]
    fn reset_restores_the_construction_snapshot() {
        let initial = state();
        let mut simulator = Simulator::new(initial.clone());
        simulator.apply_native(&info(vec![erc20(2, 4, 300)])).unwrap();
        assert_ne!(simulator.state(), &initial);
        simulator.reset();
        assert_eq!(simulator.state(), &initial);
    }

    #[test]
    fn missing_state_is_reported() {
        let mut simulator = Simulator::new(ExecutionState::default());
        let result = simulator.apply_native(&info(vec![erc20(2, 4, 1)]));
        assert!(matches!(result, Err(SimulationError::MissingState(_))));
        assert!(result.unwrap_err().is_transient());
    }
}
