//! The block-paced execution side of the pipeline: given the matches the
//! matching engine discovered, select a non-conflicting set at every new
//! block, simulate it against a synthetic token-balance state, compose one
//! batched settlement transaction, validate it against the live chain and
//! broadcast it for inclusion at the target block.

pub mod broadcast;
pub mod candidates;
pub mod engine;
pub mod executor;
pub mod info;
pub mod nonces;
pub mod scheduler;
pub mod simulator;
pub mod state;

pub use {
    broadcast::{Broadcast, Receipt},
    engine::ExecutionEngine,
    scheduler::{BlockJob, BlockProcessor, BlockScheduler},
    simulator::{SimulationError, Simulator},
};

#[cfg(test)]
mod tests;
