//! Physical connection management
//!
//! A handle owns one transport connection and its lifecycle/heartbeat state
//! machine; the registry tracks which channels are active on it; the pool
//! shards many logical subscriptions across a bounded set of handles.

mod handle;
mod pool;
mod registry;
mod transport;

pub use handle::{ConnectionHandle, ConnectionSettings, ConnectionState};
pub use pool::{ConnectionPool, HandleFactory};
pub use registry::SubscriptionRegistry;
pub use transport::{Transport, TransportFactory, WsTransport};
