//! Fan-out of unified messages to real-time subscribers.

use axum::extract::ws::Utf8Bytes;
use danmu_platforms::Platform;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::UnifiedMessage;

/// Which messages a subscriber receives. An empty filter receives everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberFilter {
    pub platform: Option<Platform>,
    pub room_id: Option<String>,
}

impl SubscriberFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            room_id: None,
        }
    }

    pub fn room(platform: Platform, room_id: impl Into<String>) -> Self {
        Self {
            platform: Some(platform),
            room_id: Some(room_id.into()),
        }
    }

    pub fn matches(&self, message: &UnifiedMessage) -> bool {
        if self.platform.is_some_and(|p| p != message.platform) {
            return false;
        }
        self.room_id
            .as_deref()
            .is_none_or(|room_id| room_id == message.room_id)
    }
}

/// Registration handle returned by [`BroadcastHub::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    filter: SubscriberFilter,
    tx: mpsc::UnboundedSender<Utf8Bytes>,
}

#[derive(Default)]
pub struct BroadcastHub {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        filter: SubscriberFilter,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<Utf8Bytes>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(?id, ?filter, "Subscriber registered");
        self.subscribers.write().insert(id, Subscriber { filter, tx });
        (id, rx)
    }

    pub fn deregister(&self, id: SubscriberId) {
        if self.subscribers.write().remove(&id).is_some() {
            debug!(?id, "Subscriber deregistered");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `message` to every matching subscriber. Returns the number of
    /// queues it was handed to.
    pub fn publish(&self, message: &UnifiedMessage) -> usize {
        let targets: Vec<_> = self
            .subscribers
            .read()
            .values()
            .filter(|s| s.filter.matches(message))
            .map(|s| s.tx.clone())
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let payload = match message.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                warn!(
                    platform = %message.platform,
                    room_id = %message.room_id,
                    error = %e,
                    "Failed to serialize message"
                );
                return 0;
            }
        };

        targets
            .into_iter()
            .filter(|tx| tx.send(payload.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EndLiveData, MessageData};

    fn message(platform: Platform, room_id: &str) -> UnifiedMessage {
        UnifiedMessage::new(platform, room_id, MessageData::EndLive(EndLiveData::default()))
    }

    #[test]
    fn test_filter_matching() {
        let msg = message(Platform::Bilibili, "100");
        assert!(SubscriberFilter::all().matches(&msg));
        assert!(SubscriberFilter::platform(Platform::Bilibili).matches(&msg));
        assert!(!SubscriberFilter::platform(Platform::Douyu).matches(&msg));
        assert!(SubscriberFilter::room(Platform::Bilibili, "100").matches(&msg));
        assert!(!SubscriberFilter::room(Platform::Bilibili, "101").matches(&msg));
    }

    #[test]
    fn test_publish_respects_filters() {
        let hub = BroadcastHub::new();
        let (_, mut unscoped) = hub.register(SubscriberFilter::all());
        let (_, mut scoped) = hub.register(SubscriberFilter::platform(Platform::Bilibili));
        let (_, mut other) = hub.register(SubscriberFilter::platform(Platform::Douyin));

        let msg = message(Platform::Bilibili, "100");
        assert_eq!(hub.publish(&msg), 2);

        let expected = msg.to_json().unwrap();
        assert_eq!(unscoped.try_recv().unwrap().as_str(), expected);
        assert_eq!(scoped.try_recv().unwrap().as_str(), expected);
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn test_deregister_and_closed_queues() {
        let hub = BroadcastHub::new();
        let (id, rx) = hub.register(SubscriberFilter::all());
        let (_, mut live) = hub.register(SubscriberFilter::all());
        assert_eq!(hub.subscriber_count(), 2);

        drop(rx);
        assert_eq!(hub.publish(&message(Platform::Huya, "kaerlol")), 1);
        assert!(live.try_recv().is_ok());

        hub.deregister(id);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.publish(&message(Platform::Douyu, "1")), 0);
    }
}
