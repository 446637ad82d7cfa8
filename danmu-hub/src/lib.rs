//! danmu-hub library crate.
//!
//! Listens to live chat rooms on several platforms, normalizes every event
//! into a [`UnifiedMessage`] and fans it out to WebSocket subscribers.

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod listener;
pub mod logging;
pub mod message;
pub mod normalize;
pub mod proxy;

pub use error::{Error, Result};
pub use hub::{BroadcastHub, SubscriberFilter};
pub use listener::{ListenerManager, ListenerManagerConfig};
pub use message::{MessageData, MessageType, UnifiedMessage};
pub use proxy::{ImageProxy, ImageProxyConfig};
