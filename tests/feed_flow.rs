//! End-to-end flow through the client: subscribe, sync a book from a
//! snapshot, apply updates, detect a sequence gap and recover.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;

use feedmux::adapter::ProtocolAdapter;
use feedmux::connection::Transport;
use feedmux::snapshot::SnapshotSource;
use feedmux::{
    Channel, Config, FeedClient, FeedEvent, Market, NormalizedEvent, PriceLevel, Result, Snapshot,
    Update,
};

fn market() -> Market {
    Market::new("mock", "BTC", "USDT", "BTCUSDT")
}

#[derive(Deserialize)]
struct WireUpdate {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    last_seq: u64,
    #[serde(default)]
    bids: Vec<(String, String)>,
    #[serde(default)]
    asks: Vec<(String, String)>,
}

struct JsonAdapter;

impl ProtocolAdapter for JsonAdapter {
    fn exchange(&self) -> &str {
        "mock"
    }

    fn encode_subscribe(&self, channel: Channel, market: &Market) -> Result<Bytes> {
        Ok(Bytes::from(format!("sub:{channel}:{}", market.remote_id)))
    }

    fn encode_unsubscribe(&self, channel: Channel, market: &Market) -> Result<Bytes> {
        Ok(Bytes::from(format!("unsub:{channel}:{}", market.remote_id)))
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<Option<NormalizedEvent>> {
        let wire: WireUpdate = serde_json::from_slice(frame)?;
        match wire.kind.as_str() {
            "ticker" => Ok(Some(NormalizedEvent::Ticker {
                market: market(),
                payload: serde_json::json!({ "seq": wire.seq }),
            })),
            "l2update" => {
                let levels = |pairs: &[(String, String)]| {
                    pairs
                        .iter()
                        .map(|(p, s)| PriceLevel::new(p, s))
                        .collect::<Vec<_>>()
                };
                Ok(Some(NormalizedEvent::L2Update(Update {
                    market: market(),
                    timestamp_ms: Some(wire.seq),
                    sequence_id: Some(wire.seq),
                    last_sequence_id: Some(wire.last_seq),
                    asks: levels(&wire.asks),
                    bids: levels(&wire.bids),
                    checksum: None,
                })))
            }
            _ => Ok(None),
        }
    }
}

struct ScriptedTransport {
    incoming: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send(&mut self, _frame: Bytes) -> Result<()> {
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        match self.incoming.recv().await {
            Some(frame) => Ok(Some(frame)),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Serves snapshots whose sequence id jumps by 100 on every fetch, so each
/// resync lands on a distinct, recognizable book.
struct VersionedSource {
    fetches: AtomicUsize,
    next_seq: AtomicU64,
}

#[async_trait]
impl SnapshotSource for VersionedSource {
    async fn fetch(&self, market: &Market) -> Result<Snapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let seq = self.next_seq.fetch_add(100, Ordering::SeqCst);
        Ok(Snapshot {
            market: market.clone(),
            timestamp_ms: Some(seq),
            sequence_id: Some(seq),
            asks: vec![PriceLevel::new("50001", "1.0")],
            bids: vec![PriceLevel::new("49999", "1.0")],
            checksum: None,
        })
    }
}

struct Rig {
    client: Arc<FeedClient>,
    events: feedmux::EventStream,
    incoming: mpsc::UnboundedSender<Bytes>,
    source: Arc<VersionedSource>,
}

fn rig() -> Rig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let slot = Mutex::new(Some(ScriptedTransport {
        incoming: incoming_rx,
    }));
    let source = Arc::new(VersionedSource {
        fetches: AtomicUsize::new(0),
        next_seq: AtomicU64::new(100),
    });

    let config = Config {
        max_subscriptions_per_handle: 10,
        rest_throttle_ms: 0,
        reconnect_interval_ms: 60_000,
        rest_request_delay_ms: 0,
        rest_concurrency: 1,
    };
    let (client, events) = FeedClient::new(
        config,
        Arc::new(JsonAdapter),
        Arc::new(move || {
            let transport = slot
                .lock()
                .unwrap()
                .take()
                .expect("a single handle is expected");
            Box::new(transport) as Box<dyn Transport>
        }),
        source.clone(),
    );

    Rig {
        client,
        events,
        incoming: incoming_tx,
        source,
    }
}

fn drain(events: &mut feedmux::EventStream) -> Vec<FeedEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn send_update(rig: &Rig, seq: u64, last_seq: u64, bid: (&str, &str)) {
    let frame = format!(
        r#"{{"type":"l2update","seq":{seq},"last_seq":{last_seq},"bids":[["{}","{}"]]}}"#,
        bid.0, bid.1
    );
    rig.incoming.send(Bytes::from(frame)).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_book_syncs_and_applies_updates() {
    let mut rig = rig();
    rig.client.subscribe_level2_updates(&market());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // snapshot (seq 100) installed and announced
    assert_eq!(rig.source.fetches.load(Ordering::SeqCst), 1);
    assert!(drain(&mut rig.events)
        .iter()
        .any(|e| matches!(e, FeedEvent::L2Snapshot { .. })));

    send_update(&rig, 101, 100, ("49999", "2.5"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let events = drain(&mut rig.events);
    assert!(events.iter().any(|e| matches!(e, FeedEvent::L2Update { .. })));

    let book = rig.client.order_book(&market(), 10).unwrap();
    assert_eq!(book.sequence_id, Some(101));
    assert_eq!(book.bids[0].size, "2.5");
}

#[tokio::test(start_paused = true)]
async fn test_sequence_gap_triggers_resync() {
    let mut rig = rig();
    rig.client.subscribe_level2_updates(&market());
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&mut rig.events);

    // update built on seq 150, but the book is at 100
    send_update(&rig, 151, 150, ("49999", "9.9"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = drain(&mut rig.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, FeedEvent::Error { message, .. } if message.contains("gap"))));
    // fresh snapshot (seq 200) replaced the desynced book
    assert_eq!(rig.source.fetches.load(Ordering::SeqCst), 2);
    assert!(events
        .iter()
        .any(|e| matches!(e, FeedEvent::L2Snapshot { .. })));

    // the stale update never touched the book
    let book = rig.client.order_book(&market(), 10).unwrap();
    assert_eq!(book.sequence_id, Some(200));
    assert_eq!(book.bids[0].size, "1.0");

    // stream resumes from the new snapshot
    send_update(&rig, 201, 200, ("49999", "3.0"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let book = rig.client.order_book(&market(), 10).unwrap();
    assert_eq!(book.sequence_id, Some(201));
    assert_eq!(book.bids[0].size, "3.0");
}

#[tokio::test(start_paused = true)]
async fn test_ticker_frames_pass_through() {
    let mut rig = rig();
    rig.client.subscribe_ticker(&market());
    tokio::time::sleep(Duration::from_millis(20)).await;

    rig.incoming
        .send(Bytes::from(r#"{"type":"ticker","seq":7}"#))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(drain(&mut rig.events)
        .iter()
        .any(|e| matches!(e, FeedEvent::Ticker { .. })));
    // no book is kept for ticker-only markets
    assert!(rig.client.order_book(&market(), 10).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_close_tears_down_everything() {
    let mut rig = rig();
    rig.client.subscribe_level2_updates(&market());
    tokio::time::sleep(Duration::from_millis(50)).await;

    rig.client.close();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(rig.client.order_book(&market(), 10).is_none());
    assert!(drain(&mut rig.events)
        .iter()
        .any(|e| matches!(e, FeedEvent::Closed { .. })));
}
