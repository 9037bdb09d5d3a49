//! feedmux - exchange-agnostic market data feed runtime
//!
//! Multiplexes logical market subscriptions over a pooled set of WebSocket
//! connections, keeps level-2 order books synchronized against REST
//! snapshots, and hands the application one normalized event stream.
//!
//! Exchange specifics live behind the [`adapter::ProtocolAdapter`] and
//! [`adapter::SnapshotEndpoint`] traits; everything else is venue-neutral.

pub mod adapter;
pub mod book;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod queue;
pub mod rate;
pub mod snapshot;
pub mod types;

mod util;

pub use client::FeedClient;
pub use config::Config;
pub use error::{FeedError, Result};
pub use events::{EventSink, EventStream, FeedEvent};
pub use types::{Channel, Market, NormalizedEvent, PriceLevel, Snapshot, Update};
