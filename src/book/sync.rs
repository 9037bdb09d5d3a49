//! Per-market order book synchronization
//!
//! Reconciles the asynchronous incremental update stream against REST
//! snapshots. Updates that arrive before the snapshot lands are dropped (a
//! bounded data-loss window); sequence gaps and checksum mismatches force a
//! resync through a fresh snapshot.

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::store::OrderBookStore;
use crate::error::{FeedError, Result};
use crate::events::{EventSink, FeedEvent};
use crate::snapshot::SnapshotFetcher;
use crate::types::{Market, Snapshot, Update};
use crate::util::{hold, now_ms};

/// Engine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    AwaitingSnapshot,
    Synced,
    /// Gap or checksum failure detected; a fresh snapshot is outstanding
    Desynced,
}

/// State machine tying the snapshot fetcher, the update stream and the book
/// store together for one market.
#[derive(Clone)]
pub struct OrderBookSyncEngine {
    shared: Arc<Shared>,
}

struct Shared {
    market: Market,
    fetcher: Arc<SnapshotFetcher>,
    events: EventSink,
    state: Mutex<EngineState>,
}

struct EngineState {
    sync: SyncState,
    store: Option<OrderBookStore>,
    last_sequence_id: Option<u64>,
    /// Bumped on every (re)fetch and on unsubscribe; a completed fetch whose
    /// epoch no longer matches is discarded
    fetch_epoch: u64,
}

impl OrderBookSyncEngine {
    pub fn new(market: Market, fetcher: Arc<SnapshotFetcher>, events: EventSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                market,
                fetcher,
                events,
                state: Mutex::new(EngineState {
                    sync: SyncState::Idle,
                    store: None,
                    last_sequence_id: None,
                    fetch_epoch: 0,
                }),
            }),
        }
    }

    pub fn market(&self) -> &Market {
        &self.shared.market
    }

    pub fn state(&self) -> SyncState {
        hold(&self.shared.state).sync
    }

    /// Current book, best-first, up to `depth` levels per side.
    pub fn snapshot(&self, depth: usize) -> Option<Snapshot> {
        let st = hold(&self.shared.state);
        st.store.as_ref().map(|store| {
            let mut snap = store.snapshot(depth);
            snap.sequence_id = st.last_sequence_id;
            snap
        })
    }

    /// Start synchronizing. Idempotent: repeat calls while a snapshot is
    /// pending trigger no additional fetch.
    pub fn subscribe(&self) {
        let mut st = hold(&self.shared.state);
        if st.sync != SyncState::Idle {
            return;
        }
        st.sync = SyncState::AwaitingSnapshot;
        self.trigger_fetch(&mut st);
    }

    /// Stop synchronizing and discard all book state. A fetch already in
    /// flight completes but its result is ignored.
    pub fn unsubscribe(&self) {
        let mut st = hold(&self.shared.state);
        st.fetch_epoch += 1;
        st.sync = SyncState::Idle;
        st.store = None;
        st.last_sequence_id = None;
    }

    /// Feed one incremental update from the adapter stream.
    pub fn handle_update(&self, update: &Update) {
        let mut st = hold(&self.shared.state);
        match st.sync {
            SyncState::Idle => {}
            SyncState::AwaitingSnapshot | SyncState::Desynced => {
                debug!(market = %self.shared.market, "Dropping update while awaiting snapshot");
            }
            SyncState::Synced => self.apply_update(&mut st, update),
        }
    }

    fn apply_update(&self, st: &mut EngineState, update: &Update) {
        if let (Some(expected), Some(got)) = (st.last_sequence_id, update.last_sequence_id) {
            if got != expected {
                warn!(
                    market = %self.shared.market,
                    expected,
                    got,
                    "Sequence gap detected, resyncing"
                );
                self.desync(st, FeedError::SequenceGap { expected, got }.to_string());
                return;
            }
        }

        // applied sequence ids must advance even when the update carries no
        // last_sequence_id to chain on
        if let (Some(prev), Some(seq)) = (st.last_sequence_id, update.sequence_id) {
            if seq <= prev {
                warn!(
                    market = %self.shared.market,
                    prev,
                    seq,
                    "Non-monotonic sequence id, resyncing"
                );
                self.desync(
                    st,
                    FeedError::SequenceGap {
                        expected: prev + 1,
                        got: seq,
                    }
                    .to_string(),
                );
                return;
            }
        }

        let ts = update.timestamp_ms.unwrap_or_else(now_ms);
        let applied = match st.store.as_mut() {
            Some(store) => apply_levels(store, update, ts),
            None => Err(FeedError::Parse("book store missing while synced".to_string())),
        };
        if let Err(e) = applied {
            self.desync(st, format!("bad update: {e}"));
            return;
        }

        if update.sequence_id.is_some() {
            st.last_sequence_id = update.sequence_id;
        }

        if let Some(expected) = &update.checksum {
            let computed = st.store.as_ref().map(|s| s.checksum()).unwrap_or_default();
            if &computed != expected {
                warn!(
                    market = %self.shared.market,
                    exchange = %expected,
                    local = %computed,
                    "Checksum mismatch, resyncing"
                );
                self.desync(
                    st,
                    FeedError::ChecksumMismatch {
                        expected: expected.clone(),
                        computed,
                    }
                    .to_string(),
                );
                return;
            }
        }

        let _ = self.shared.events.send(FeedEvent::L2Update {
            payload: update.clone(),
            market: self.shared.market.clone(),
        });
    }

    fn desync(&self, st: &mut EngineState, reason: String) {
        st.sync = SyncState::Desynced;
        st.store = None;
        st.last_sequence_id = None;
        let _ = self.shared.events.send(FeedEvent::Error {
            message: reason,
            market: Some(self.shared.market.clone()),
        });
        self.trigger_fetch(st);
    }

    /// Kick off exactly one snapshot fetch for the current epoch.
    ///
    /// The task loops on malformed snapshots so the "retried until success"
    /// guarantee holds end to end, not just at the transport layer.
    fn trigger_fetch(&self, st: &mut EngineState) {
        st.fetch_epoch += 1;
        let epoch = st.fetch_epoch;
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                let snapshot = match shared.fetcher.fetch(&shared.market).await {
                    Ok(snapshot) => snapshot,
                    Err(_) => return, // fetcher shut down
                };

                let installed = {
                    let mut st = hold(&shared.state);
                    if st.fetch_epoch != epoch
                        || !matches!(st.sync, SyncState::AwaitingSnapshot | SyncState::Desynced)
                    {
                        return; // unsubscribed or superseded meanwhile
                    }
                    match OrderBookStore::from_snapshot(&snapshot) {
                        Ok(store) => {
                            st.store = Some(store);
                            st.last_sequence_id = snapshot.sequence_id;
                            st.sync = SyncState::Synced;
                            true
                        }
                        Err(e) => {
                            let _ = shared.events.send(FeedEvent::Error {
                                message: format!("malformed snapshot: {e}"),
                                market: Some(shared.market.clone()),
                            });
                            false
                        }
                    }
                };

                if installed {
                    info!(market = %shared.market, "Order book synchronized");
                    let _ = shared.events.send(FeedEvent::L2Snapshot {
                        payload: snapshot,
                        market: shared.market.clone(),
                    });
                    return;
                }
                warn!(market = %shared.market, "Snapshot rejected, refetching");
            }
        });
    }
}

fn apply_levels(store: &mut OrderBookStore, update: &Update, timestamp_ms: u64) -> Result<()> {
    for level in &update.asks {
        store.update(false, level, timestamp_ms)?;
    }
    for level in &update.bids {
        store.update(true, level, timestamp_ms)?;
    }
    Ok(())
}
