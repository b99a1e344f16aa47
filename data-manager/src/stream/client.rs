use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use trading_common::data::{Candle, OrderBook, Ticker, Timeframe};
use trading_common::retry::RetryPolicy;

use super::messages::{
    depth_channel, kline_channel, ticker_channel, ControlRequest, Frame, StreamMessage,
};
use super::state::{ConnectionState, StateCell};
use super::{StreamError, StreamResult};
use crate::config::{Settings, StreamSettings};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Callback for one kind of event. Runs on the connection task; keep it short.
pub type StreamHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Kline,
    Ticker,
    Depth,
    Status,
}

/// Validated event delivered to handlers. Klines are always closed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Kline(Candle),
    Ticker(Ticker),
    Depth(OrderBook),
    Status(ConnectionState),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Kline(_) => EventKind::Kline,
            StreamEvent::Ticker(_) => EventKind::Ticker,
            StreamEvent::Depth(_) => EventKind::Depth,
            StreamEvent::Status(_) => EventKind::Status,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub messages_received: u64,
    pub malformed_dropped: u64,
    pub closed_klines: u64,
    pub reconnects: u64,
    pub handler_panics: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_received: AtomicU64,
    malformed_dropped: AtomicU64,
    closed_klines: AtomicU64,
    reconnects: AtomicU64,
    handler_panics: AtomicU64,
}

#[derive(Debug)]
enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

enum SessionEnd {
    Shutdown,
    Closed,
}

struct Inner {
    url: String,
    reconnect: RetryPolicy,
    ping_interval: Option<Duration>,
    connect_timeout: Duration,
    state: StateCell,
    subscriptions: RwLock<BTreeSet<String>>,
    handlers: DashMap<EventKind, Vec<StreamHandler>>,
    counters: Counters,
    commands: mpsc::Sender<Command>,
    command_rx: Mutex<mpsc::Receiver<Command>>,
    next_request_id: AtomicU64,
}

/// Binance market stream client.
///
/// Cheap to clone; every clone talks to the same connection task. `run`
/// owns the socket, while `subscribe` and `on` may be called from anywhere.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl StreamClient {
    pub fn new(url: impl Into<String>, settings: &StreamSettings) -> Self {
        let (commands, command_rx) = mpsc::channel(settings.command_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                reconnect: settings.reconnect_policy(),
                ping_interval: settings.ping_interval(),
                connect_timeout: settings.connect_timeout(),
                state: StateCell::default(),
                subscriptions: RwLock::new(BTreeSet::new()),
                handlers: DashMap::new(),
                counters: Counters::default(),
                commands,
                command_rx: Mutex::new(command_rx),
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.binance.ws_url.clone(), &settings.stream)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn stats(&self) -> StreamStats {
        let c = &self.inner.counters;
        StreamStats {
            messages_received: c.messages_received.load(Ordering::Relaxed),
            malformed_dropped: c.malformed_dropped.load(Ordering::Relaxed),
            closed_klines: c.closed_klines.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            handler_panics: c.handler_panics.load(Ordering::Relaxed),
        }
    }

    /// Channels re-issued on every connect
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.read().iter().cloned().collect()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Add channels. They are sent right away when connected and re-issued
    /// after every reconnect.
    pub async fn subscribe(&self, channels: Vec<String>) -> StreamResult<()> {
        let added: Vec<String> = {
            let mut subs = self.inner.subscriptions.write();
            channels.into_iter().filter(|c| subs.insert(c.clone())).collect()
        };
        if added.is_empty() {
            return Ok(());
        }
        info!(channels = ?added, "subscribing");
        self.send_command(Command::Subscribe(added)).await
    }

    pub async fn unsubscribe(&self, channels: Vec<String>) -> StreamResult<()> {
        let removed: Vec<String> = {
            let mut subs = self.inner.subscriptions.write();
            channels.into_iter().filter(|c| subs.remove(c)).collect()
        };
        if removed.is_empty() {
            return Ok(());
        }
        info!(channels = ?removed, "unsubscribing");
        self.send_command(Command::Unsubscribe(removed)).await
    }

    pub async fn subscribe_klines(&self, symbol: &str, timeframes: &[Timeframe]) -> StreamResult<()> {
        let channels = timeframes
            .iter()
            .map(|tf| kline_channel(symbol, *tf))
            .collect::<Result<Vec<_>, _>>()?;
        self.subscribe(channels).await
    }

    pub async fn subscribe_ticker(&self, symbol: &str) -> StreamResult<()> {
        self.subscribe(vec![ticker_channel(symbol)?]).await
    }

    pub async fn subscribe_depth(&self, symbol: &str) -> StreamResult<()> {
        self.subscribe(vec![depth_channel(symbol)?]).await
    }

    async fn send_command(&self, command: Command) -> StreamResult<()> {
        // While disconnected the subscription set is replayed on connect
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        self.inner
            .commands
            .send(command)
            .await
            .map_err(|_| StreamError::Closed)
    }

    /// Connect and keep the connection alive until `shutdown` fires or the
    /// reconnect policy gives up.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> StreamResult<()> {
        let mut commands = self
            .inner
            .command_rx
            .try_lock()
            .map_err(|_| StreamError::AlreadyRunning)?;
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                result = self.connect() => result,
                _ = shutdown.recv() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            };

            match connected {
                Ok(ws) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    info!(url = %self.inner.url, "stream connected");

                    let outcome = self.session(ws, &mut commands, &mut shutdown).await;
                    self.set_state(ConnectionState::Disconnected);
                    match outcome {
                        Ok(SessionEnd::Shutdown) => {
                            info!("stream shut down");
                            return Ok(());
                        }
                        Ok(SessionEnd::Closed) => warn!("stream closed by server"),
                        Err(e) => warn!(error = %e, "stream session failed"),
                    }
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(url = %self.inner.url, error = %e, "stream connect failed");
                }
            }

            attempt += 1;
            if !self.inner.reconnect.allows(attempt) {
                error!(attempts = attempt, "giving up on stream reconnects");
                return Err(StreamError::ReconnectExhausted(attempt));
            }
            let delay = self.inner.reconnect.delay_for(attempt);
            self.inner.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }

    async fn connect(&self) -> StreamResult<WsStream> {
        let timeout = self.inner.connect_timeout;
        let (ws, _) = tokio::time::timeout(timeout, connect_async(self.inner.url.as_str()))
            .await
            .map_err(|_| StreamError::ConnectTimeout(timeout))??;
        Ok(ws)
    }

    async fn session(
        &self,
        ws: WsStream,
        commands: &mut mpsc::Receiver<Command>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> StreamResult<SessionEnd> {
        let (mut write, mut read) = ws.split();

        // Anything queued before the connect is covered by the replay
        while commands.try_recv().is_ok() {}
        let channels = self.subscriptions();
        if !channels.is_empty() {
            info!(channels = channels.len(), "re-issuing subscriptions");
            self.send_control(&mut write, ControlRequest::subscribe(channels, self.request_id()))
                .await?;
        }

        let mut ping = self
            .inner
            .ping_interval
            .map(|every| interval_at(Instant::now() + every, every));

        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Ping(payload))) => write.send(Message::Pong(payload)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "close frame received");
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Closed),
                },
                Some(command) = commands.recv() => {
                    let request = match command {
                        Command::Subscribe(channels) => ControlRequest::subscribe(channels, self.request_id()),
                        Command::Unsubscribe(channels) => ControlRequest::unsubscribe(channels, self.request_id()),
                    };
                    self.send_control(&mut write, request).await?;
                }
                _ = next_ping(&mut ping) => write.send(Message::Ping(Vec::new())).await?,
                _ = shutdown.recv() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "failed to send close frame");
                    }
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    async fn send_control(&self, write: &mut WsSink, request: ControlRequest) -> StreamResult<()> {
        let body = serde_json::to_string(&request)?;
        debug!(method = request.method, id = request.id, "sending control request");
        write.send(Message::Text(body)).await?;
        Ok(())
    }

    fn request_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set_state(&self, next: ConnectionState) {
        if self.inner.state.transition(next).is_ok() {
            self.dispatch(&StreamEvent::Status(next));
        }
    }

    /// Parse, validate and dispatch one text frame. Never fails.
    pub(crate) fn handle_text(&self, text: &str) {
        let counters = &self.inner.counters;
        counters.messages_received.fetch_add(1, Ordering::Relaxed);

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                counters.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, frame = %preview(text), "dropping malformed frame");
                return;
            }
        };

        let message = match frame {
            Frame::Combined { data, .. } | Frame::Event(data) => data,
            Frame::Ack { id, .. } => {
                debug!(id, "request acknowledged");
                return;
            }
            Frame::Error { error, id } => {
                warn!(?id, code = error.code, message = %error.msg, "request rejected by server");
                return;
            }
        };

        let event = match message {
            StreamMessage::Kline(kline) if !kline.is_closed() => return,
            StreamMessage::Kline(kline) => kline.to_candle().map(StreamEvent::Kline),
            StreamMessage::Ticker(ticker) => ticker.to_ticker().map(StreamEvent::Ticker),
            StreamMessage::Depth(depth) => depth.to_order_book().map(StreamEvent::Depth),
        };

        match event {
            Ok(event) => {
                if event.kind() == EventKind::Kline {
                    counters.closed_klines.fetch_add(1, Ordering::Relaxed);
                }
                self.dispatch(&event);
            }
            Err(e) => {
                counters.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, frame = %preview(text), "dropping invalid event");
            }
        }
    }

    fn dispatch(&self, event: &StreamEvent) {
        // Clone the list so a handler may register others without deadlocking
        let handlers = match self.inner.handlers.get(&event.kind()) {
            Some(handlers) => handlers.clone(),
            None => return,
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                self.inner.counters.handler_panics.fetch_add(1, Ordering::Relaxed);
                error!(kind = ?event.kind(), "stream handler panicked");
            }
        }
    }
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
