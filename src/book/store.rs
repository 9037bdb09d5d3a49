//! Sorted-array price-level container
//!
//! Both sides keep their best value at the tail: asks sort descending by
//! price, bids ascending. Market activity clusters near the best price, so
//! array-shift inserts and deletes stay cheap where they actually happen
//! while binary search keeps lookup O(log n).

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{FeedError, Result};
use crate::types::{Market, PriceLevel, Snapshot};
use crate::util::now_ms;

const CHECKSUM_DEPTH: usize = 10;

#[derive(Debug, Clone)]
struct StoredLevel {
    price: Decimal,
    /// Wire strings are preserved verbatim; the checksum depends on them
    price_raw: String,
    size_raw: String,
    count: Option<u32>,
    timestamp_ms: u64,
}

impl StoredLevel {
    fn to_price_level(&self) -> PriceLevel {
        PriceLevel {
            price: self.price_raw.clone(),
            size: self.size_raw.clone(),
            count: self.count,
            meta: None,
        }
    }
}

/// Order book for a single market
#[derive(Debug)]
pub struct OrderBookStore {
    market: Market,
    /// Descending by price; best (lowest) ask at the tail
    asks: Vec<StoredLevel>,
    /// Ascending by price; best (highest) bid at the tail
    bids: Vec<StoredLevel>,
}

impl OrderBookStore {
    /// Build a book from a snapshot, sorting both sides.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self> {
        let ts = snapshot.timestamp_ms.unwrap_or_else(now_ms);

        let mut asks = snapshot
            .asks
            .iter()
            .map(|l| parse_level(l, ts))
            .collect::<Result<Vec<_>>>()?;
        let mut bids = snapshot
            .bids
            .iter()
            .map(|l| parse_level(l, ts))
            .collect::<Result<Vec<_>>>()?;

        asks.sort_by(|a, b| b.price.cmp(&a.price));
        bids.sort_by(|a, b| a.price.cmp(&b.price));

        Ok(Self {
            market: snapshot.market.clone(),
            asks,
            bids,
        })
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    /// Apply one level mutation.
    ///
    /// An update whose timestamp is not newer than the stored level is a
    /// no-op, which makes replays and out-of-order delivery idempotent.
    pub fn update(&mut self, is_bid: bool, level: &PriceLevel, timestamp_ms: u64) -> Result<()> {
        let price = parse_decimal(&level.price)?;
        let size = parse_decimal(&level.size)?;

        let side = if is_bid { &mut self.bids } else { &mut self.asks };
        let found = if is_bid {
            side.binary_search_by(|l| l.price.cmp(&price))
        } else {
            side.binary_search_by(|l| price.cmp(&l.price))
        };

        match found {
            Ok(idx) => {
                if timestamp_ms <= side[idx].timestamp_ms {
                    return Ok(()); // stale
                }
                if size.is_zero() {
                    side.remove(idx);
                } else {
                    side[idx].size_raw = level.size.clone();
                    side[idx].count = level.count;
                    side[idx].timestamp_ms = timestamp_ms;
                }
            }
            Err(idx) => {
                if !size.is_zero() {
                    side.insert(
                        idx,
                        StoredLevel {
                            price,
                            price_raw: level.price.clone(),
                            size_raw: level.size.clone(),
                            count: level.count,
                            timestamp_ms,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Best (lowest) ask
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.last().map(StoredLevel::to_price_level)
    }

    /// Best (highest) bid
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.last().map(StoredLevel::to_price_level)
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    /// Up to `depth` levels per side, best-first.
    pub fn snapshot(&self, depth: usize) -> Snapshot {
        Snapshot {
            market: self.market.clone(),
            timestamp_ms: Some(now_ms()),
            sequence_id: None,
            asks: self
                .asks
                .iter()
                .rev()
                .take(depth)
                .map(StoredLevel::to_price_level)
                .collect(),
            bids: self
                .bids
                .iter()
                .rev()
                .take(depth)
                .map(StoredLevel::to_price_level)
                .collect(),
            checksum: None,
        }
    }

    /// CRC32 over the canonicalized top ten levels of each side.
    ///
    /// Prices and sizes lose their decimal point and leading zeros
    /// ("0.00050000" becomes "50000"), asks concatenate before bids, and the
    /// CRC32 of the resulting ASCII string is rendered in decimal. Comparable
    /// against exchange-supplied checksums of the same top-of-book window.
    pub fn checksum(&self) -> String {
        let mut canonical = String::new();
        for level in self.asks.iter().rev().take(CHECKSUM_DEPTH) {
            canonical.push_str(&canonicalize(&level.price_raw));
            canonical.push_str(&canonicalize(&level.size_raw));
        }
        for level in self.bids.iter().rev().take(CHECKSUM_DEPTH) {
            canonical.push_str(&canonicalize(&level.price_raw));
            canonical.push_str(&canonicalize(&level.size_raw));
        }
        crc32fast::hash(canonical.as_bytes()).to_string()
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|_| FeedError::InvalidDecimal(raw.to_string()))
}

fn parse_level(level: &PriceLevel, timestamp_ms: u64) -> Result<StoredLevel> {
    Ok(StoredLevel {
        price: parse_decimal(&level.price)?,
        price_raw: level.price.clone(),
        size_raw: level.size.clone(),
        count: level.count,
        timestamp_ms,
    })
}

/// Strip the decimal point and leading zeros from a wire decimal string.
fn canonicalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| *c != '.').collect();
    digits.trim_start_matches('0').to_string()
}
