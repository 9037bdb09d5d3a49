//! Normalized data model shared by all exchange adapters
//!
//! Prices and sizes are kept as decimal strings end to end: parsing them into
//! a numeric type is lossy for some venues and is the adapter's concern. The
//! book store parses copies internally only for ordering.

use serde::{Deserialize, Serialize};

/// Identity of one tradable instrument on one exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    pub exchange: String,
    pub base: String,
    pub quote: String,
    /// Symbol as the exchange spells it (e.g. "BTCUSDT", "XBT/USD")
    pub remote_id: String,
}

impl Market {
    pub fn new(exchange: &str, base: &str, quote: &str, remote_id: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
            remote_id: remote_id.to_string(),
        }
    }

    /// Identity key, stable for the life of the market
    pub fn full_id(&self) -> String {
        format!("{}:{}/{}", self.exchange, self.base, self.quote)
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.exchange, self.base, self.quote)
    }
}

/// One order book row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl PriceLevel {
    pub fn new(price: &str, size: &str) -> Self {
        Self {
            price: price.to_string(),
            size: size.to_string(),
            count: None,
            meta: None,
        }
    }
}

/// Full (or top-N) order book state at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub market: Market,
    pub timestamp_ms: Option<u64>,
    pub sequence_id: Option<u64>,
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    pub checksum: Option<String>,
}

/// Incremental delta applied on top of the last known book state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub market: Market,
    pub timestamp_ms: Option<u64>,
    pub sequence_id: Option<u64>,
    /// Sequence id of the update this delta builds on; mismatch means a gap
    pub last_sequence_id: Option<u64>,
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    pub checksum: Option<String>,
}

/// Subscription channel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Ticker,
    Trade,
    Candle,
    Level2Snapshot,
    Level2Update,
    Level3Update,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Channel::Ticker => "ticker",
            Channel::Trade => "trade",
            Channel::Candle => "candle",
            Channel::Level2Snapshot => "l2snapshot",
            Channel::Level2Update => "l2update",
            Channel::Level3Update => "l3update",
        };
        f.write_str(name)
    }
}

/// Decoded event handed up by a protocol adapter
///
/// Ticker/trade/candle payloads pass through untouched; only book events get
/// structure because the sync engine has to reason about them.
#[derive(Debug, Clone)]
pub enum NormalizedEvent {
    Ticker { market: Market, payload: serde_json::Value },
    Trade { market: Market, payload: serde_json::Value },
    Candle { market: Market, payload: serde_json::Value },
    L2Snapshot(Snapshot),
    L2Update(Update),
    L3Snapshot(Snapshot),
    L3Update(Update),
}

impl NormalizedEvent {
    pub fn market(&self) -> &Market {
        match self {
            NormalizedEvent::Ticker { market, .. }
            | NormalizedEvent::Trade { market, .. }
            | NormalizedEvent::Candle { market, .. } => market,
            NormalizedEvent::L2Snapshot(s) | NormalizedEvent::L3Snapshot(s) => &s.market,
            NormalizedEvent::L2Update(u) | NormalizedEvent::L3Update(u) => &u.market,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_id() {
        let market = Market::new("binance", "BTC", "USDT", "BTCUSDT");
        assert_eq!(market.full_id(), "binance:BTC/USDT");
        assert_eq!(market.to_string(), "binance:BTC/USDT");
    }

    #[test]
    fn test_price_level_roundtrip() {
        let level = PriceLevel::new("0.00050000", "1.5");
        let json = serde_json::to_string(&level).unwrap();
        let back: PriceLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(level, back);
        // optional fields stay off the wire when unset
        assert!(!json.contains("count"));
    }
}
