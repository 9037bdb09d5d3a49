//! Sharding logical subscriptions across a bounded set of connections
//!
//! The pool assigns each market to a handle and caps how many markets one
//! handle carries. Allocation is hole-filling: freed capacity on an existing
//! handle is reused before a new connection is dialed, and a handle whose
//! last market leaves is closed and dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::handle::ConnectionHandle;
use crate::util::hold;

/// Builds a connection handle for a new pool slot.
pub trait HandleFactory: Send + Sync {
    fn create(&self, id: u64) -> Arc<ConnectionHandle>;
}

impl<F> HandleFactory for F
where
    F: Fn(u64) -> Arc<ConnectionHandle> + Send + Sync,
{
    fn create(&self, id: u64) -> Arc<ConnectionHandle> {
        (self)(id)
    }
}

struct Slot {
    handle: Arc<ConnectionHandle>,
    subscribers: usize,
}

struct PoolInner {
    slots: Vec<Slot>,
    /// market full_id -> handle id
    assignments: HashMap<String, u64>,
    next_id: u64,
}

pub struct ConnectionPool {
    factory: Box<dyn HandleFactory>,
    max_subscriptions: usize,
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    pub fn new(max_subscriptions: usize, factory: impl HandleFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            max_subscriptions: max_subscriptions.max(1),
            inner: Mutex::new(PoolInner {
                slots: Vec::new(),
                assignments: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Handle carrying `market_id`, assigning one if needed.
    ///
    /// Repeated calls for the same market return the same handle without
    /// consuming more capacity. New markets fill the first handle with spare
    /// capacity; only when every slot is full is a new connection dialed.
    pub fn take(&self, market_id: &str) -> Arc<ConnectionHandle> {
        let mut inner = hold(&self.inner);

        if let Some(&id) = inner.assignments.get(market_id) {
            if let Some(slot) = inner.slots.iter().find(|s| s.handle.id() == id) {
                return slot.handle.clone();
            }
        }

        let idx = match inner
            .slots
            .iter()
            .position(|s| s.subscribers < self.max_subscriptions)
        {
            Some(idx) => idx,
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                info!(handle_id = id, market = market_id, "Opening new connection");
                let handle = self.factory.create(id);
                inner.slots.push(Slot {
                    handle,
                    subscribers: 0,
                });
                inner.slots.len() - 1
            }
        };

        let id = inner.slots[idx].handle.id();
        inner.slots[idx].subscribers += 1;
        inner.assignments.insert(market_id.to_string(), id);
        debug!(
            handle_id = id,
            market = market_id,
            subscribers = inner.slots[idx].subscribers,
            "Market assigned"
        );
        inner.slots[idx].handle.clone()
    }

    /// Release `market_id`'s seat. Closes the handle when it empties.
    pub fn leave(&self, market_id: &str) {
        let mut inner = hold(&self.inner);
        let Some(id) = inner.assignments.remove(market_id) else {
            return;
        };
        let Some(pos) = inner.slots.iter().position(|s| s.handle.id() == id) else {
            return;
        };

        inner.slots[pos].subscribers -= 1;
        if inner.slots[pos].subscribers == 0 {
            let slot = inner.slots.remove(pos);
            info!(handle_id = id, "Last market left, closing connection");
            slot.handle.close();
        }
    }

    /// Handle currently assigned to `market_id`, if any. Never allocates.
    pub fn get(&self, market_id: &str) -> Option<Arc<ConnectionHandle>> {
        let inner = hold(&self.inner);
        let id = *inner.assignments.get(market_id)?;
        inner
            .slots
            .iter()
            .find(|s| s.handle.id() == id)
            .map(|s| s.handle.clone())
    }

    /// Close every handle and drop all assignments.
    pub fn close_all(&self) {
        let mut inner = hold(&self.inner);
        for slot in inner.slots.drain(..) {
            slot.handle.close();
        }
        inner.assignments.clear();
    }

    pub fn handle_count(&self) -> usize {
        hold(&self.inner).slots.len()
    }
}
