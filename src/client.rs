//! Application facade
//!
//! One `FeedClient` per exchange. It owns the connection pool, the snapshot
//! fetcher and one sync engine per level-2 market, and routes everything the
//! adapters decode into a single event stream the application consumes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::adapter::ProtocolAdapter;
use crate::book::OrderBookSyncEngine;
use crate::config::Config;
use crate::connection::{ConnectionHandle, ConnectionPool, ConnectionSettings, TransportFactory};
use crate::events::{self, EventSink, EventStream, FeedEvent};
use crate::snapshot::{SnapshotFetcher, SnapshotSource};
use crate::types::{Channel, Market, NormalizedEvent};
use crate::util::hold;

struct ClientInner {
    /// market full_id -> active channels
    channels: HashMap<String, HashSet<Channel>>,
    /// market full_id -> book sync engine, present only while l2update is on
    engines: HashMap<String, OrderBookSyncEngine>,
}

pub struct FeedClient {
    pool: ConnectionPool,
    fetcher: Arc<SnapshotFetcher>,
    events: EventSink,
    inner: Arc<Mutex<ClientInner>>,
}

impl FeedClient {
    /// Build a client for one exchange. Must be called inside a tokio
    /// runtime; connection and router tasks are spawned lazily as markets
    /// subscribe.
    pub fn new(
        config: Config,
        adapter: Arc<dyn ProtocolAdapter>,
        transports: Arc<dyn TransportFactory>,
        source: Arc<dyn SnapshotSource>,
    ) -> (Arc<Self>, EventStream) {
        let (event_tx, event_rx) = events::channel();
        let (norm_tx, norm_rx) = mpsc::unbounded_channel();

        let fetcher = Arc::new(SnapshotFetcher::new(
            source,
            config.rest_concurrency,
            Duration::from_millis(config.rest_request_delay_ms),
            event_tx.clone(),
        ));

        let settings = ConnectionSettings {
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            send_throttle: Duration::from_millis(config.rest_throttle_ms),
        };
        let factory = {
            let adapter = adapter.clone();
            let events = event_tx.clone();
            move |id: u64| {
                ConnectionHandle::spawn(
                    id,
                    adapter.clone(),
                    transports.create(),
                    settings.clone(),
                    events.clone(),
                    norm_tx.clone(),
                )
            }
        };
        let pool = ConnectionPool::new(config.max_subscriptions_per_handle, factory);

        let inner = Arc::new(Mutex::new(ClientInner {
            channels: HashMap::new(),
            engines: HashMap::new(),
        }));
        spawn_router(norm_rx, event_tx.clone(), inner.clone());

        info!(exchange = adapter.exchange(), "Feed client created");
        let client = Arc::new(Self {
            pool,
            fetcher,
            events: event_tx,
            inner,
        });
        (client, event_rx)
    }

    pub fn subscribe_ticker(&self, market: &Market) {
        self.subscribe(Channel::Ticker, market);
    }

    pub fn subscribe_trades(&self, market: &Market) {
        self.subscribe(Channel::Trade, market);
    }

    pub fn subscribe_candles(&self, market: &Market) {
        self.subscribe(Channel::Candle, market);
    }

    /// Exchange-pushed full book snapshots, no local book kept.
    pub fn subscribe_level2_snapshots(&self, market: &Market) {
        self.subscribe(Channel::Level2Snapshot, market);
    }

    /// Incremental book updates, validated against a locally synchronized
    /// book. Creates the market's sync engine.
    pub fn subscribe_level2_updates(&self, market: &Market) {
        self.subscribe(Channel::Level2Update, market);
    }

    pub fn subscribe_level3_updates(&self, market: &Market) {
        self.subscribe(Channel::Level3Update, market);
    }

    pub fn unsubscribe_ticker(&self, market: &Market) {
        self.unsubscribe(Channel::Ticker, market);
    }

    pub fn unsubscribe_trades(&self, market: &Market) {
        self.unsubscribe(Channel::Trade, market);
    }

    pub fn unsubscribe_candles(&self, market: &Market) {
        self.unsubscribe(Channel::Candle, market);
    }

    pub fn unsubscribe_level2_snapshots(&self, market: &Market) {
        self.unsubscribe(Channel::Level2Snapshot, market);
    }

    pub fn unsubscribe_level2_updates(&self, market: &Market) {
        self.unsubscribe(Channel::Level2Update, market);
    }

    pub fn unsubscribe_level3_updates(&self, market: &Market) {
        self.unsubscribe(Channel::Level3Update, market);
    }

    /// Synchronized book for a level-2 market, best-first, if synced.
    pub fn order_book(&self, market: &Market, depth: usize) -> Option<crate::types::Snapshot> {
        let engine = hold(&self.inner).engines.get(&market.full_id()).cloned();
        engine.and_then(|e| e.snapshot(depth))
    }

    /// Tear everything down: aborts pending snapshot fetches and closes
    /// every connection.
    pub fn close(&self) {
        info!("Closing feed client");
        self.fetcher.close();
        self.pool.close_all();
        let mut inner = hold(&self.inner);
        for engine in inner.engines.values() {
            engine.unsubscribe();
        }
        inner.engines.clear();
        inner.channels.clear();
    }

    fn subscribe(&self, channel: Channel, market: &Market) {
        let full_id = market.full_id();
        let handle = self.pool.take(&full_id);
        {
            let mut inner = hold(&self.inner);
            let channels = inner.channels.entry(full_id.clone()).or_default();
            if !channels.insert(channel) {
                // pool.take already held this market's seat
                debug!(market = %market, channel = %channel, "Already subscribed");
                return;
            }
            if channel == Channel::Level2Update {
                let engine = inner.engines.entry(full_id).or_insert_with(|| {
                    OrderBookSyncEngine::new(
                        market.clone(),
                        self.fetcher.clone(),
                        self.events.clone(),
                    )
                });
                engine.subscribe();
            }
        }
        handle.subscribe(channel, market.clone());
    }

    fn unsubscribe(&self, channel: Channel, market: &Market) {
        let full_id = market.full_id();
        let last = {
            let mut inner = hold(&self.inner);
            let Some(channels) = inner.channels.get_mut(&full_id) else {
                return;
            };
            if !channels.remove(&channel) {
                return;
            }
            let now_empty = channels.is_empty();
            if channel == Channel::Level2Update {
                if let Some(engine) = inner.engines.remove(&full_id) {
                    engine.unsubscribe();
                }
            }
            if now_empty {
                inner.channels.remove(&full_id);
                true
            } else {
                false
            }
        };

        if let Some(handle) = self.pool.get(&full_id) {
            handle.unsubscribe(channel, market.clone());
        }
        if last {
            self.pool.leave(&full_id);
        }
    }
}

fn spawn_router(
    mut normalized: mpsc::UnboundedReceiver<NormalizedEvent>,
    events: EventSink,
    inner: Arc<Mutex<ClientInner>>,
) {
    tokio::spawn(async move {
        while let Some(event) = normalized.recv().await {
            match event {
                NormalizedEvent::Ticker { market, payload } => {
                    let _ = events.send(FeedEvent::Ticker { payload, market });
                }
                NormalizedEvent::Trade { market, payload } => {
                    let _ = events.send(FeedEvent::Trade { payload, market });
                }
                NormalizedEvent::Candle { market, payload } => {
                    let _ = events.send(FeedEvent::Candle { payload, market });
                }
                NormalizedEvent::L2Snapshot(snapshot) => {
                    let market = snapshot.market.clone();
                    let _ = events.send(FeedEvent::L2Snapshot {
                        payload: snapshot,
                        market,
                    });
                }
                // book updates go through the sync engine, which emits the
                // event itself once the update is validated and applied
                NormalizedEvent::L2Update(update) => {
                    let engine = hold(&inner).engines.get(&update.market.full_id()).cloned();
                    match engine {
                        Some(engine) => engine.handle_update(&update),
                        None => {
                            debug!(market = %update.market, "No sync engine for update, dropping")
                        }
                    }
                }
                NormalizedEvent::L3Snapshot(snapshot) => {
                    let market = snapshot.market.clone();
                    let _ = events.send(FeedEvent::L3Snapshot {
                        payload: snapshot,
                        market,
                    });
                }
                NormalizedEvent::L3Update(update) => {
                    let market = update.market.clone();
                    let _ = events.send(FeedEvent::L3Update {
                        payload: update,
                        market,
                    });
                }
            }
        }
    });
}
