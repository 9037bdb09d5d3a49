//! Per-connection subscription bookkeeping

use std::collections::HashMap;

use crate::types::{Channel, Market};

/// Tracks which (channel, market) pairs a connection should be receiving.
///
/// The registry is the durable record; the socket is not. On reconnect the
/// handle replays every entry, so a subscription survives any number of
/// connection drops.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: HashMap<(Channel, String), Market>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns false if it was already present, in
    /// which case no frame should be sent.
    pub fn subscribe(&mut self, channel: Channel, market: Market) -> bool {
        self.active
            .insert((channel, market.remote_id.clone()), market)
            .is_none()
    }

    /// Drop a subscription. Returns false if it was not present.
    pub fn unsubscribe(&mut self, channel: Channel, market: &Market) -> bool {
        self.active
            .remove(&(channel, market.remote_id.clone()))
            .is_some()
    }

    pub fn contains(&self, channel: Channel, market: &Market) -> bool {
        self.active
            .contains_key(&(channel, market.remote_id.clone()))
    }

    /// Every active subscription, for replay after a reconnect.
    pub fn entries(&self) -> Vec<(Channel, Market)> {
        self.active
            .iter()
            .map(|((channel, _), market)| (*channel, market.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
