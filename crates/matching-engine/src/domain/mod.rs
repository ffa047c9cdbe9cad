pub mod admission;
pub mod collection;
pub mod health;
pub mod matching;
pub mod relay;

pub use {
    admission::{AdmissionConfig, AdmissionError},
    collection::CollectionPipeline,
    matching::MatchingEngine,
    relay::OrderRelay,
};
