//! Application-facing event surface
//!
//! Every component publishes into one typed mpsc channel instead of relaying
//! stringly-named events through decorators. The application owns the receiver.

use tokio::sync::mpsc;

use crate::types::{Market, Snapshot, Update};

/// Events emitted by the feed runtime
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connecting { handle_id: u64 },
    Connected { handle_id: u64 },
    Disconnected { handle_id: u64 },
    Reconnecting { handle_id: u64 },
    Closing { handle_id: u64 },
    Closed { handle_id: u64 },
    /// Non-fatal failure; the connection or retry loop it came from stays up
    Error { message: String, market: Option<Market> },
    Ticker { payload: serde_json::Value, market: Market },
    Trade { payload: serde_json::Value, market: Market },
    Candle { payload: serde_json::Value, market: Market },
    L2Snapshot { payload: Snapshot, market: Market },
    L2Update { payload: Update, market: Market },
    L3Snapshot { payload: Snapshot, market: Market },
    L3Update { payload: Update, market: Market },
}

/// Sending half of the event channel, cloned into every component
pub type EventSink = mpsc::UnboundedSender<FeedEvent>;

/// Receiving half handed to the application
pub type EventStream = mpsc::UnboundedReceiver<FeedEvent>;

pub fn channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}
