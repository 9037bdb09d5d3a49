//! Exchange adapter contract
//!
//! One adapter per exchange, selected at construction and composed into each
//! connection handle; the runtime never parses exchange-specific JSON itself.

use bytes::Bytes;

use crate::error::Result;
use crate::types::{Channel, Market, NormalizedEvent, Snapshot};

/// Wire-format boundary between the runtime and one exchange.
pub trait ProtocolAdapter: Send + Sync {
    /// Exchange identifier (matches `Market::exchange`)
    fn exchange(&self) -> &str;

    /// Encode the frame that subscribes `market` to `channel`.
    fn encode_subscribe(&self, channel: Channel, market: &Market) -> Result<Bytes>;

    /// Encode the frame that unsubscribes `market` from `channel`.
    fn encode_unsubscribe(&self, channel: Channel, market: &Market) -> Result<Bytes>;

    /// Decode one inbound frame into a normalized event.
    ///
    /// `Ok(None)` means a frame the runtime should ignore (acks, info
    /// messages); `Err` means a malformed frame, which is surfaced as an
    /// error event and dropped without touching the connection.
    fn decode_frame(&self, frame: &[u8]) -> Result<Option<NormalizedEvent>>;
}

/// REST side of an adapter: where snapshots live and how to read them.
pub trait SnapshotEndpoint: Send + Sync {
    /// Full URL of the order book snapshot for `market`.
    fn snapshot_url(&self, market: &Market) -> String;

    /// Decode the response body into a normalized snapshot.
    fn decode_snapshot(&self, market: &Market, body: &[u8]) -> Result<Snapshot>;
}
