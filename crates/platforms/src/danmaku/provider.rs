//! Connection configuration and per-connection bookkeeping.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Reconnection policy for a WebSocket danmu connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WebSocketProviderConfig {
    /// Connection attempts before giving up, both at start and after a drop.
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for WebSocketProviderConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            base_reconnect_delay_ms: 5000,
            max_reconnect_delay_ms: 5000,
        }
    }
}

impl WebSocketProviderConfig {
    /// Delay before the given (1-based) attempt: exponential from the base, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_reconnect_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_reconnect_delay_ms.max(self.base_reconnect_delay_ms));
        Duration::from_millis(delay)
    }
}

/// Configuration for establishing a danmu connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Authentication cookies supplied by the caller.
    pub cookies: Option<String>,
    /// WebSocket-specific configuration (reconnect settings, etc.)
    pub websocket: Option<WebSocketProviderConfig>,
}

impl ConnectionConfig {
    pub fn with_cookies(cookies: Option<String>) -> Self {
        Self {
            cookies: cookies.filter(|c| !c.trim().is_empty()),
            websocket: None,
        }
    }

    pub fn with_websocket(mut self, config: WebSocketProviderConfig) -> Self {
        self.websocket = Some(config);
        self
    }
}

/// Live counters for one connection, shared with whoever reports status.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    connected: AtomicBool,
    frames: AtomicU64,
    dropped_frames: AtomicU64,
    reconnects: AtomicU32,
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatsSnapshot {
    pub connected: bool,
    pub frames: u64,
    pub dropped_frames: u64,
    pub reconnects: u32,
}

impl ConnectionStats {
    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Why a streaming connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The caller cancelled the connection.
    Cancelled,
    /// The platform announced the end of the live stream.
    Finished,
    /// Nobody is listening for events anymore.
    ConsumerClosed,
    /// Reconnection attempts ran out.
    Exhausted,
}
