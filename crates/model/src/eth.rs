use {
    derive_more::{Display, From, Into},
    serde::{Deserialize, Serialize},
};

pub use alloy::primitives::{Address, B256, Bytes, U256};

/// Wei per gwei.
const GWEI: u64 = 1_000_000_000;

/// Chain ID as defined by EIP-155.
///
/// https://eips.ethereum.org/EIPS/eip-155
#[derive(
    Debug,
    Clone,
    Copy,
    Display,
    PartialEq,
    Eq,
    Hash,
    From,
    Into,
    Serialize,
    Deserialize,
    PartialOrd,
    Ord,
)]
pub struct ChainId(pub u64);

/// A gas price in whole gwei.
///
/// The match index is keyed by this type: a match is only worth executing
/// while the network gas price stays at or below its tolerance, and whole
/// gwei is precise enough for that comparison.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    From,
    Into,
    Serialize,
    Deserialize,
)]
pub struct Gwei(pub u64);

impl Gwei {
    /// Converts a wei amount to whole gwei, rounding down.
    pub fn from_wei(wei: U256) -> Self {
        Self(u64::try_from(wei / U256::from(GWEI)).unwrap_or(u64::MAX))
    }

    pub fn to_wei(self) -> U256 {
        U256::from(self.0) * U256::from(GWEI)
    }
}

/// A block as observed on chain, reduced to the fields the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub base_fee_per_gas: U256,
}

/// The future block an execution attempt is aimed at.
///
/// The base fee is a worst-case projection: EIP-1559 allows the base fee to
/// grow by at most 12.5% per block, so projecting `offset` blocks ahead
/// multiplies by 1.125 that many times, rounding up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetBlock {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee_per_gas: U256,
}

impl TargetBlock {
    /// Average mainnet block interval used to project the target timestamp.
    pub const BLOCK_INTERVAL_SECONDS: u64 = 13;

    pub fn project(current: &Block, offset: u64) -> Self {
        Self {
            number: current.number + offset,
            timestamp: current.timestamp + offset * Self::BLOCK_INTERVAL_SECONDS,
            base_fee_per_gas: project_base_fee(current.base_fee_per_gas, offset),
        }
    }
}

/// The maximum base fee `blocks_ahead` blocks from now, assuming every block
/// in between is full. Integer fixed point: multiply by 1125, divide by 1000,
/// rounding up at each step.
pub fn project_base_fee(base_fee: U256, blocks_ahead: u64) -> U256 {
    let mut fee = base_fee;
    for _ in 0..blocks_ahead {
        fee = (fee * U256::from(1125) + U256::from(999)) / U256::from(1000);
    }
    fee
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gwei_conversion_rounds_down() {
        assert_eq!(Gwei::from_wei(U256::from(1_999_999_999u64)), Gwei(1));
        assert_eq!(Gwei::from_wei(U256::from(20_000_000_000u64)), Gwei(20));
        assert_eq!(Gwei(3).to_wei(), U256::from(3_000_000_000u64));
    }

    #[test]
    fn base_fee_projection_rounds_up_per_block() {
        // 1000 -> 1125 -> 1266 (1265.625 rounded up)
        assert_eq!(
            project_base_fee(U256::from(1000), 1),
            U256::from(1125u64)
        );
        assert_eq!(
            project_base_fee(U256::from(1000), 2),
            U256::from(1266u64)
        );
        // Zero blocks ahead leaves the fee untouched.
        assert_eq!(project_base_fee(U256::from(7), 0), U256::from(7));
    }

    #[test]
    fn target_block_projection() {
        let current = Block {
            number: 100,
            timestamp: 1_700_000_000,
            base_fee_per_gas: U256::from(10_000_000_000u64),
        };
        let target = TargetBlock::project(&current, 2);
        assert_eq!(target.number, 102);
        assert_eq!(target.timestamp, 1_700_000_026);
        assert_eq!(
            target.base_fee_per_gas,
            project_base_fee(current.base_fee_per_gas, 2)
        );
    }
}
