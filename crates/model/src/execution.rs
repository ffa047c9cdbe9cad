use {
    crate::eth::{B256, U256},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Outcome of one block-paced execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockStatus {
    /// The attempt is in flight.
    Pending,
    /// Nothing was executable at this block.
    Skipped,
    /// A transaction was broadcast but did not land.
    NotIncluded,
    /// The transaction landed with status 1.
    Executed,
}

/// Per-block record of an execution attempt. The last few of these are kept
/// in a capped list for liveness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBlock {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub status: BlockStatus,
    /// Why a skipped block was skipped.
    pub skip_reason: Option<String>,
    pub num_executable_matches: usize,
    pub num_inexecutable_matches: usize,
    /// Net wei moved in/out of the intermediary, from the balance-change
    /// simulation. Negative values reject the attempt.
    pub balance_change_wei: Option<i128>,
    pub timing: Timing,
    pub tx_hash: Option<B256>,
}

/// Wall-clock measurements of one block attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Timing {
    pub started_at: Option<DateTime<Utc>>,
    pub broadcast_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Timing {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(now),
            ..Default::default()
        }
    }

    /// Total duration of the attempt, if it ran to completion.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// Per-order projection of a block outcome. Exactly one record per order per
/// block; only the executed form is persisted durably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ExecutionOrder {
    Pending {
        block: u64,
    },
    Inexecutable {
        block: u64,
        reason: String,
    },
    NotIncluded {
        block: u64,
    },
    Executed {
        block: u64,
        tx_hash: B256,
        gas_used: u64,
        effective_gas_price: U256,
        block_timestamp: u64,
    },
}

impl ExecutionOrder {
    pub fn block(&self) -> u64 {
        match self {
            Self::Pending { block }
            | Self::Inexecutable { block, .. }
            | Self::NotIncluded { block }
            | Self::Executed { block, .. } => *block,
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed { .. })
    }
}
