//! Live chat (danmu) adapters for Chinese streaming platforms.
//!
//! Each platform module exposes a [`danmaku::DanmuProtocol`] implementation
//! driven by the shared [`danmaku::WebSocketDanmuProvider`], plus the HTTP
//! lookups (gift catalogs, avatars) its events need.

pub mod danmaku;
pub mod http;
pub mod platform;
pub mod platforms;

pub use platform::Platform;
