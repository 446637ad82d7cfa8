use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::Platform;
use crate::danmaku::error::{DanmakuError, Result};
use crate::danmaku::provider::{
    ConnectionConfig, ConnectionStats, StreamEnd, WebSocketProviderConfig,
};
use crate::danmaku::transport::{TungsteniteConnector, WsConnector, WsTransport};

fn parse_cookie_header(input: &str) -> Vec<(String, String)> {
    input
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }

            let mut kv = part.splitn(2, '=');
            let name = kv.next()?.trim();
            let value = kv.next()?.trim();
            if name.is_empty() || value.is_empty() {
                return None;
            }

            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Merge two `Cookie` header values; entries in `extra` override `base`.
pub fn merge_cookie_headers(base: Option<&str>, extra: Option<&str>) -> Option<String> {
    let base = base.map(str::trim).filter(|s| !s.is_empty());
    let extra = extra.map(str::trim).filter(|s| !s.is_empty());

    match (base, extra) {
        (None, None) => None,
        (Some(base), None) => Some(base.to_string()),
        (None, Some(extra)) => Some(extra.to_string()),
        (Some(base), Some(extra)) => {
            let mut parts = parse_cookie_header(base);
            let mut index_by_name: HashMap<String, usize> = HashMap::with_capacity(parts.len());
            for (idx, (name, _)) in parts.iter().enumerate() {
                index_by_name.insert(name.clone(), idx);
            }

            for (name, value) in parse_cookie_header(extra) {
                if let Some(existing_idx) = index_by_name.get(&name) {
                    parts[*existing_idx].1 = value;
                } else {
                    let idx = parts.len();
                    parts.push((name.clone(), value));
                    index_by_name.insert(name, idx);
                }
            }

            Some(
                parts
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }
}

/// Look up a single cookie value by name.
pub fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    parse_cookie_header(cookies)
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
}

/// Outcome of decoding one inbound frame.
#[derive(Debug)]
pub struct DecodedFrame<E> {
    /// Typed events, in wire order.
    pub events: Vec<E>,
    /// Frames the peer expects back (acks). Written before `events` are emitted.
    pub replies: Vec<Message>,
    /// The platform signalled that the live has ended; stop after emitting.
    pub finished: bool,
}

impl<E> Default for DecodedFrame<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            replies: Vec::new(),
            finished: false,
        }
    }
}

impl<E> DecodedFrame<E> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn events(events: Vec<E>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn with_reply(mut self, reply: Message) -> Self {
        self.replies.push(reply);
        self
    }

    pub fn finish(mut self) -> Self {
        self.finished = true;
        self
    }
}

/// Protocol definitions for a specific platform.
#[async_trait]
pub trait DanmuProtocol: Send + 'static {
    /// Typed event produced by this platform's decoder.
    type Event: Send + 'static;

    fn platform(&self) -> Platform;

    /// Validate the room and fetch whatever session state the connection needs.
    ///
    /// Called once before the first connection attempt. Errors here are start failures.
    async fn resolve(&mut self, _room_id: &str) -> Result<()> {
        Ok(())
    }

    /// Get the WebSocket URL for the room. Called before every connection attempt.
    async fn websocket_url(&mut self, room_id: &str) -> Result<String>;

    /// Extra headers for the WebSocket upgrade request.
    fn headers(&self, _room_id: &str) -> Vec<(String, String)> {
        vec![]
    }

    /// Cookies the protocol wants on the connection.
    fn cookies(&self) -> Option<String> {
        None
    }

    /// Whether to send the `Cookie` header during the WebSocket upgrade.
    fn send_cookie_header(&self) -> bool {
        true
    }

    /// Receive the merged cookies before the URL is resolved, e.g. to derive a uid.
    fn configure_connection(&mut self, _cookies: Option<&str>) {}

    /// Frames to send right after the connection opens.
    fn handshake_messages(&self, _room_id: &str) -> Result<Vec<Message>> {
        Ok(vec![])
    }

    fn heartbeat_message(&self) -> Option<Message> {
        None
    }

    /// Heartbeat interval (default: 30 seconds)
    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Decode one WebSocket message into typed events and the replies it requires.
    fn decode_message(&mut self, message: &Message) -> Result<DecodedFrame<Self::Event>>;
}

/// A generic WebSocket-based danmu provider.
///
/// [`connect`](Self::connect) resolves the room and opens the first connection;
/// the returned [`DanmuConnection`] then streams events until cancelled.
pub struct WebSocketDanmuProvider<P> {
    protocol: P,
    config: WebSocketProviderConfig,
    connector: Arc<dyn WsConnector>,
}

impl<P: DanmuProtocol> WebSocketDanmuProvider<P> {
    pub fn with_protocol(protocol: P, config: Option<WebSocketProviderConfig>) -> Self {
        Self {
            protocol,
            config: config.unwrap_or_default(),
            connector: Arc::new(TungsteniteConnector),
        }
    }

    /// Replace the transport used to open connections.
    pub fn with_connector(mut self, connector: Arc<dyn WsConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn platform(&self) -> Platform {
        self.protocol.platform()
    }

    /// Resolve the room and establish the first connection.
    ///
    /// Retries transient connection failures up to the configured bound. Resolution
    /// failures and exhausted retries are returned as errors.
    pub async fn connect(
        self,
        room_id: &str,
        config: ConnectionConfig,
        cancel: &CancellationToken,
    ) -> Result<DanmuConnection<P>> {
        let Self {
            mut protocol,
            config: default_ws_config,
            connector,
        } = self;
        let ws_config = config.websocket.unwrap_or(default_ws_config);
        let platform = protocol.platform();

        tokio::select! {
            res = protocol.resolve(room_id) => res?,
            _ = cancel.cancelled() => return Err(DanmakuError::Cancelled),
        }
        debug!(%platform, room_id, "Room resolved");

        let mut attempt = 0u32;
        let transport = loop {
            let res = tokio::select! {
                res = open_transport(&mut protocol, connector.as_ref(), room_id, config.cookies.as_deref()) => res,
                _ = cancel.cancelled() => return Err(DanmakuError::Cancelled),
            };
            match res {
                Ok(transport) => break transport,
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= ws_config.max_reconnect_attempts {
                        return Err(DanmakuError::connection(format!(
                            "Giving up after {attempt} attempts: {e}"
                        )));
                    }
                    warn!(%platform, room_id, attempt, error = %e, "Connection failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(ws_config.backoff(attempt)) => {}
                        _ = cancel.cancelled() => return Err(DanmakuError::Cancelled),
                    }
                }
            }
        };

        let stats = Arc::new(ConnectionStats::default());
        stats.set_connected(true);
        info!(%platform, room_id, "Connected to danmu server");

        Ok(DanmuConnection {
            platform,
            room_id: room_id.to_string(),
            connected_at: Utc::now(),
            protocol,
            transport: Some(transport),
            connector,
            config: ws_config,
            cookies: config.cookies,
            stats,
        })
    }
}

/// Open one transport: derive cookies, resolve the URL, connect and send the handshake.
async fn open_transport<P: DanmuProtocol>(
    protocol: &mut P,
    connector: &dyn WsConnector,
    room_id: &str,
    extra_cookies: Option<&str>,
) -> Result<Box<dyn WsTransport>> {
    let merged_cookies = merge_cookie_headers(protocol.cookies().as_deref(), extra_cookies);
    protocol.configure_connection(merged_cookies.as_deref());

    let url = protocol.websocket_url(room_id).await?;
    debug!(platform = %protocol.platform(), "Connecting to WebSocket: {}", url);

    let mut headers = protocol.headers(room_id);
    if protocol.send_cookie_header() {
        if let Some(cookie_str) = merged_cookies {
            match headers
                .iter_mut()
                .find(|(name, _)| name.eq_ignore_ascii_case("Cookie"))
            {
                Some((_, value)) => {
                    *value = merge_cookie_headers(Some(value.as_str()), Some(&cookie_str))
                        .unwrap_or(cookie_str);
                }
                None => headers.push(("Cookie".to_string(), cookie_str)),
            }
        }
    } else {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("Cookie"));
    }

    let mut transport = connector.connect(&url, &headers).await?;
    for msg in protocol.handshake_messages(room_id)? {
        transport
            .send(msg)
            .await
            .map_err(|e| DanmakuError::connection(format!("Handshake failed: {e}")))?;
    }
    Ok(transport)
}

enum LoopExit {
    Cancelled,
    Finished,
    ConsumerClosed,
    Disconnected,
}

/// An established danmu connection for one room.
pub struct DanmuConnection<P: DanmuProtocol> {
    pub platform: Platform,
    pub room_id: String,
    pub connected_at: DateTime<Utc>,
    protocol: P,
    transport: Option<Box<dyn WsTransport>>,
    connector: Arc<dyn WsConnector>,
    config: WebSocketProviderConfig,
    cookies: Option<String>,
    stats: Arc<ConnectionStats>,
}

impl<P: DanmuProtocol> DanmuConnection<P> {
    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    /// Stream decoded events into `tx` until cancelled, finished or out of retries.
    pub async fn run(mut self, tx: mpsc::Sender<P::Event>, cancel: CancellationToken) -> StreamEnd {
        let mut attempt = 0u32;

        let end = loop {
            let mut transport = match self.transport.take() {
                Some(transport) => transport,
                None => match self.reconnect(&mut attempt, &cancel).await {
                    Ok(transport) => transport,
                    Err(end) => break end,
                },
            };
            self.stats.set_connected(true);

            match self
                .stream_frames(transport.as_mut(), &tx, &cancel, &mut attempt)
                .await
            {
                LoopExit::Cancelled => {
                    transport.close().await;
                    break StreamEnd::Cancelled;
                }
                LoopExit::Finished => {
                    transport.close().await;
                    break StreamEnd::Finished;
                }
                LoopExit::ConsumerClosed => {
                    transport.close().await;
                    break StreamEnd::ConsumerClosed;
                }
                LoopExit::Disconnected => {
                    self.stats.set_connected(false);
                }
            }
        };

        self.stats.set_connected(false);
        debug!(platform = %self.platform, room_id = %self.room_id, ?end, "WebSocket task stopped");
        end
    }

    async fn reconnect(
        &mut self,
        attempt: &mut u32,
        cancel: &CancellationToken,
    ) -> std::result::Result<Box<dyn WsTransport>, StreamEnd> {
        loop {
            if *attempt >= self.config.max_reconnect_attempts {
                error!(
                    platform = %self.platform,
                    room_id = %self.room_id,
                    "Max reconnect attempts reached"
                );
                return Err(StreamEnd::Exhausted);
            }
            *attempt += 1;
            self.stats.record_reconnect();

            tokio::select! {
                _ = tokio::time::sleep(self.config.backoff(*attempt)) => {}
                _ = cancel.cancelled() => return Err(StreamEnd::Cancelled),
            }

            let res = tokio::select! {
                res = open_transport(&mut self.protocol, self.connector.as_ref(), &self.room_id, self.cookies.as_deref()) => res,
                _ = cancel.cancelled() => return Err(StreamEnd::Cancelled),
            };
            match res {
                Ok(transport) => {
                    info!(platform = %self.platform, room_id = %self.room_id, attempt = *attempt, "Reconnected");
                    return Ok(transport);
                }
                Err(e) if !e.is_retryable() => {
                    error!(platform = %self.platform, room_id = %self.room_id, error = %e, "Reconnect failed permanently");
                    return Err(StreamEnd::Exhausted);
                }
                Err(e) => {
                    warn!(platform = %self.platform, room_id = %self.room_id, attempt = *attempt, error = %e, "Reconnect failed");
                }
            }
        }
    }

    /// Read, decode and forward frames.
    ///
    /// Decoded events wait in `pending` until the consumer has room. While
    /// they wait no further frames are read, but heartbeats and cancellation
    /// are still served.
    async fn stream_frames(
        &mut self,
        transport: &mut dyn WsTransport,
        tx: &mpsc::Sender<P::Event>,
        cancel: &CancellationToken,
        attempt: &mut u32,
    ) -> LoopExit {
        let heartbeat_enabled = self.protocol.heartbeat_message().is_some();
        let mut heartbeat_timer = tokio::time::interval(self.protocol.heartbeat_interval());
        heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut pending: VecDeque<P::Event> = VecDeque::new();
        let mut finished = false;

        loop {
            if finished && pending.is_empty() {
                info!(platform = %self.platform, room_id = %self.room_id, "Live ended");
                return LoopExit::Finished;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return LoopExit::Cancelled,

                _ = heartbeat_timer.tick(), if heartbeat_enabled => {
                    if let Some(msg) = self.protocol.heartbeat_message() {
                        if let Err(e) = transport.send(msg).await {
                            error!(platform = %self.platform, error = %e, "Failed to send heartbeat");
                            return LoopExit::Disconnected;
                        }
                        trace!("Sent heartbeat for {}", self.room_id);
                    }
                }

                permit = tx.reserve(), if !pending.is_empty() => {
                    let Ok(permit) = permit else {
                        return LoopExit::ConsumerClosed;
                    };
                    if let Some(event) = pending.pop_front() {
                        permit.send(event);
                    }
                }

                msg_opt = transport.next(), if pending.is_empty() && !finished => {
                    match msg_opt {
                        Some(Ok(msg)) => {
                            *attempt = 0;
                            self.stats.record_frame();
                            let frame = match self.protocol.decode_message(&msg) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    self.stats.record_dropped();
                                    warn!(platform = %self.platform, room_id = %self.room_id, error = %e, "Failed to decode message");
                                    continue;
                                }
                            };

                            for reply in frame.replies {
                                if let Err(e) = transport.send(reply).await {
                                    error!(platform = %self.platform, error = %e, "Failed to send response message");
                                    return LoopExit::Disconnected;
                                }
                            }
                            pending.extend(frame.events);
                            finished = frame.finished;
                        }
                        Some(Err(e)) => {
                            error!(platform = %self.platform, room_id = %self.room_id, error = %e, "WebSocket error");
                            return LoopExit::Disconnected;
                        }
                        None => {
                            warn!(platform = %self.platform, room_id = %self.room_id, "WebSocket stream closed");
                            return LoopExit::Disconnected;
                        }
                    }
                }
            }
        }
    }
}
