//! Connection lifecycle state machine
//!
//! Each handle runs one actor task that owns the transport outright. All
//! interaction goes through a command channel, so subscription changes, raw
//! sends and shutdown are serialized with frame processing and no lock is
//! ever held across the socket.
//!
//! Lifecycle: `Connecting -> Connected`, then on any transport failure or a
//! stale heartbeat `Disconnected -> Reconnecting -> Connecting` after a
//! backoff. `close()` moves to `Closing -> Closed` from any state and the
//! actor exits. Subscriptions live in the registry, not the socket; every
//! reconnect replays them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, error, info, warn};

use super::registry::SubscriptionRegistry;
use super::transport::Transport;
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::events::{EventSink, FeedEvent};
use crate::rate::Throttle;
use crate::types::{Channel, Market, NormalizedEvent};
use crate::util::hold;

/// Delay between losing a connection and dialing again
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Longest silence tolerated on the socket before forcing a reconnect
    pub reconnect_interval: Duration,
    /// Minimum spacing between outbound frames
    pub send_throttle: Duration,
}

enum Command {
    Subscribe(Channel, Market),
    Unsubscribe(Channel, Market),
    Send(Bytes),
    Close,
}

/// Cheap cloneable face of one connection actor.
pub struct ConnectionHandle {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<ConnectionState>>,
}

impl ConnectionHandle {
    /// Spawn the actor task and return its handle. Must be called inside a
    /// tokio runtime.
    pub fn spawn(
        id: u64,
        adapter: Arc<dyn ProtocolAdapter>,
        transport: Box<dyn Transport>,
        settings: ConnectionSettings,
        events: EventSink,
        normalized: mpsc::UnboundedSender<NormalizedEvent>,
    ) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let actor = Actor {
            id,
            adapter,
            transport,
            settings,
            events,
            normalized,
            registry: SubscriptionRegistry::new(),
            state: state.clone(),
        };
        tokio::spawn(actor.run(cmd_rx));
        Arc::new(Self {
            id,
            commands: cmd_tx,
            state,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *hold(&self.state)
    }

    /// Register and (when connected) send a subscription. Idempotent.
    pub fn subscribe(&self, channel: Channel, market: Market) {
        let _ = self.commands.send(Command::Subscribe(channel, market));
    }

    pub fn unsubscribe(&self, channel: Channel, market: Market) {
        let _ = self.commands.send(Command::Unsubscribe(channel, market));
    }

    /// Queue a raw frame through the outbound throttle.
    pub fn send(&self, frame: Bytes) {
        let _ = self.commands.send(Command::Send(frame));
    }

    /// Permanently close the connection. The actor drains nothing: pending
    /// throttled frames are dropped.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

#[derive(PartialEq)]
enum Exit {
    Reconnect,
    Close,
}

enum Wake {
    Inbound(Result<Option<Bytes>>),
    Command(Option<Command>),
    Outbound(Option<Bytes>),
    Heartbeat,
}

struct Actor {
    id: u64,
    adapter: Arc<dyn ProtocolAdapter>,
    transport: Box<dyn Transport>,
    settings: ConnectionSettings,
    events: EventSink,
    normalized: mpsc::UnboundedSender<NormalizedEvent>,
    registry: SubscriptionRegistry,
    state: Arc<Mutex<ConnectionState>>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let throttle = Throttle::new(self.settings.send_throttle, move |frame| {
            let _ = out_tx.send(frame);
        });

        loop {
            self.set_state(ConnectionState::Connecting);
            match self.transport.connect().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    self.resubscribe_all(&throttle);
                    if self.connected_loop(&mut commands, &mut out_rx, &throttle).await
                        == Exit::Close
                    {
                        self.shutdown(&throttle).await;
                        return;
                    }
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    error!(handle_id = self.id, error = %e, "Connect failed");
                    let _ = self.events.send(FeedEvent::Error {
                        message: format!("connect: {e}"),
                        market: None,
                    });
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            if self.backoff(&mut commands).await == Exit::Close {
                self.shutdown(&throttle).await;
                return;
            }
        }
    }

    async fn connected_loop(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        out_rx: &mut mpsc::UnboundedReceiver<Bytes>,
        throttle: &Throttle<Bytes>,
    ) -> Exit {
        let mut heartbeat = interval(self.settings.reconnect_interval);
        // interval() fires immediately; the watchdog should not
        heartbeat.reset();
        let mut last_frame = Instant::now();

        loop {
            let wake = tokio::select! {
                frame = self.transport.recv() => Wake::Inbound(frame),
                cmd = commands.recv() => Wake::Command(cmd),
                frame = out_rx.recv() => Wake::Outbound(frame),
                _ = heartbeat.tick() => Wake::Heartbeat,
            };

            match wake {
                Wake::Inbound(Ok(Some(frame))) => {
                    last_frame = Instant::now();
                    self.dispatch_frame(&frame);
                }
                // control frame, still proof of life
                Wake::Inbound(Ok(None)) => last_frame = Instant::now(),
                Wake::Inbound(Err(e)) => {
                    warn!(handle_id = self.id, error = %e, "Connection lost");
                    let _ = self.events.send(FeedEvent::Error {
                        message: format!("transport: {e}"),
                        market: None,
                    });
                    return Exit::Reconnect;
                }
                Wake::Command(Some(Command::Close)) | Wake::Command(None) => return Exit::Close,
                Wake::Command(Some(cmd)) => self.apply_command(cmd, throttle),
                Wake::Outbound(Some(frame)) => {
                    if let Err(e) = self.transport.send(frame).await {
                        warn!(handle_id = self.id, error = %e, "Send failed");
                        let _ = self.events.send(FeedEvent::Error {
                            message: format!("send: {e}"),
                            market: None,
                        });
                        return Exit::Reconnect;
                    }
                }
                // the throttle callback keeps the sender alive for the actor's life
                Wake::Outbound(None) => {}
                Wake::Heartbeat => {
                    if last_frame.elapsed() >= self.settings.reconnect_interval {
                        warn!(
                            handle_id = self.id,
                            idle_ms = last_frame.elapsed().as_millis() as u64,
                            "No traffic within heartbeat window, forcing reconnect"
                        );
                        self.transport.close().await;
                        return Exit::Reconnect;
                    }
                }
            }
        }
    }

    /// Wait out the reconnect backoff while keeping the registry current.
    async fn backoff(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Exit {
        let deadline = sleep(RECONNECT_BACKOFF);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Exit::Reconnect,
                cmd = commands.recv() => match cmd {
                    Some(Command::Close) | None => return Exit::Close,
                    Some(Command::Subscribe(channel, market)) => {
                        self.registry.subscribe(channel, market);
                    }
                    Some(Command::Unsubscribe(channel, market)) => {
                        self.registry.unsubscribe(channel, &market);
                    }
                    // nowhere to send it
                    Some(Command::Send(_)) => {}
                },
            }
        }
    }

    fn apply_command(&mut self, cmd: Command, throttle: &Throttle<Bytes>) {
        match cmd {
            Command::Subscribe(channel, market) => {
                if !self.registry.subscribe(channel, market.clone()) {
                    debug!(handle_id = self.id, channel = %channel, market = %market, "Already subscribed");
                    return;
                }
                self.encode_and_queue(channel, &market, true, throttle);
            }
            Command::Unsubscribe(channel, market) => {
                if !self.registry.unsubscribe(channel, &market) {
                    return;
                }
                self.encode_and_queue(channel, &market, false, throttle);
            }
            Command::Send(frame) => throttle.add(frame),
            // handled by the caller
            Command::Close => {}
        }
    }

    fn resubscribe_all(&self, throttle: &Throttle<Bytes>) {
        let entries = self.registry.entries();
        if entries.is_empty() {
            return;
        }
        info!(
            handle_id = self.id,
            count = entries.len(),
            "Replaying subscriptions"
        );
        for (channel, market) in entries {
            self.encode_and_queue(channel, &market, true, throttle);
        }
    }

    fn encode_and_queue(
        &self,
        channel: Channel,
        market: &Market,
        subscribe: bool,
        throttle: &Throttle<Bytes>,
    ) {
        let encoded = if subscribe {
            self.adapter.encode_subscribe(channel, market)
        } else {
            self.adapter.encode_unsubscribe(channel, market)
        };
        match encoded {
            Ok(frame) => throttle.add(frame),
            Err(e) => {
                warn!(handle_id = self.id, channel = %channel, market = %market, error = %e, "Encode failed");
                let _ = self.events.send(FeedEvent::Error {
                    message: format!("encode {channel}: {e}"),
                    market: Some(market.clone()),
                });
            }
        }
    }

    fn dispatch_frame(&self, frame: &[u8]) {
        match self.adapter.decode_frame(frame) {
            Ok(Some(event)) => {
                let _ = self.normalized.send(event);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(handle_id = self.id, error = %e, "Dropping malformed frame");
                let _ = self.events.send(FeedEvent::Error {
                    message: format!("decode: {e}"),
                    market: None,
                });
            }
        }
    }

    async fn shutdown(&mut self, throttle: &Throttle<Bytes>) {
        self.set_state(ConnectionState::Closing);
        throttle.cancel();
        self.transport.close().await;
        self.set_state(ConnectionState::Closed);
        info!(handle_id = self.id, "Connection closed");
    }

    fn set_state(&self, next: ConnectionState) {
        *hold(&self.state) = next;
        debug!(handle_id = self.id, state = ?next, "State changed");
        let event = match next {
            ConnectionState::Connecting => FeedEvent::Connecting { handle_id: self.id },
            ConnectionState::Connected => FeedEvent::Connected { handle_id: self.id },
            ConnectionState::Disconnected => FeedEvent::Disconnected { handle_id: self.id },
            ConnectionState::Reconnecting => FeedEvent::Reconnecting { handle_id: self.id },
            ConnectionState::Closing => FeedEvent::Closing { handle_id: self.id },
            ConnectionState::Closed => FeedEvent::Closed { handle_id: self.id },
        };
        let _ = self.events.send(event);
    }
}
