//! Domain data model shared by the matching and execution pipelines.
//!
//! Everything in this crate is plain data: orders and their lifecycle
//! statuses, discovered matches, per-block execution records and the wire
//! types exchanged with the external order-event stream and snapshot source.
//! No I/O happens here.

pub mod eth;
pub mod events;
pub mod execution;
pub mod matches;
pub mod order;
pub mod source;

pub use {
    eth::{Block, ChainId, Gwei, TargetBlock},
    events::{Cursor, OrderEvent, OrderEventKind, OrderPayload, SnapshotMetadata, SnapshotRecord},
    execution::{BlockStatus, ExecutionBlock, ExecutionOrder},
    matches::{Match, MatchId},
    order::{Order, OrderId, OrderStatus, Side},
    source::OrderSource,
};
