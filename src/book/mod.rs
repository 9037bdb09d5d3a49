//! Order book state and synchronization
//!
//! The store keeps sorted price levels with binary-search mutation; the sync
//! engine reconciles the incremental update stream against REST snapshots.

mod store;
mod sync;

pub use store::OrderBookStore;
pub use sync::{OrderBookSyncEngine, SyncState};
