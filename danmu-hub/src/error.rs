//! Application-wide error types.

use danmu_platforms::Platform;
use danmu_platforms::danmaku::DanmakuError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Already listening to {platform} room {room_id}")]
    AlreadyListening { platform: Platform, room_id: String },

    #[error("No listener for {platform} room {room_id}")]
    NotFound { platform: Platform, room_id: String },

    #[error("Failed to start listener: {0}")]
    StartupFailure(#[from] DanmakuError),

    #[error("Timed out starting {platform} room {room_id}")]
    StartTimeout { platform: Platform, room_id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(platform: Platform, room_id: impl Into<String>) -> Self {
        Self::NotFound {
            platform,
            room_id: room_id.into(),
        }
    }
}

/// Parse a platform name from a path segment or request body.
pub fn parse_platform(name: &str) -> Result<Platform> {
    name.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| Error::UnsupportedPlatform(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform() {
        assert_eq!(parse_platform("bilibili").unwrap(), Platform::Bilibili);
        assert_eq!(parse_platform(" Douyu ").unwrap(), Platform::Douyu);
        assert!(matches!(
            parse_platform("twitch"),
            Err(Error::UnsupportedPlatform(name)) if name == "twitch"
        ));
    }

    #[test]
    fn test_startup_failure_wraps_platform_error() {
        let err: Error = DanmakuError::room_not_found("42").into();
        assert!(matches!(err, Error::StartupFailure(_)));
        assert!(err.to_string().starts_with("Failed to start listener"));
    }
}
