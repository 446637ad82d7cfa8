//! Error types for danmu connections.

use thiserror::Error;

/// Result alias used across the danmaku layer.
pub type Result<T> = std::result::Result<T, DanmakuError>;

#[derive(Debug, Error)]
pub enum DanmakuError {
    /// Transport level failure (connect, read, write, handshake).
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer sent something we could not make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The platform reported that the room does not exist.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The room id is not in the shape the platform expects.
    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("cancelled")]
    Cancelled,
}

impl DanmakuError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn room_not_found(room_id: impl Into<String>) -> Self {
        Self::RoomNotFound(room_id.into())
    }

    pub fn signature(msg: impl Into<String>) -> Self {
        Self::Signature(msg.into())
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Room lookups that came back negative and malformed ids never recover.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::RoomNotFound(_) | Self::InvalidRoomId(_) | Self::Cancelled
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DanmakuError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DanmakuError::connection("reset").is_retryable());
        assert!(DanmakuError::protocol("bad frame").is_retryable());
        assert!(!DanmakuError::room_not_found("123").is_retryable());
        assert!(!DanmakuError::InvalidRoomId("abc".into()).is_retryable());
        assert!(!DanmakuError::Cancelled.is_retryable());
    }
}
