pub mod cursors;
pub mod events;
pub mod snapshots;

pub use {
    cursors::CursorStore,
    events::OrderEventSource,
    snapshots::SnapshotSource,
};
