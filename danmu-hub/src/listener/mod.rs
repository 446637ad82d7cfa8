//! Listener lifecycle.
//!
//! A listener owns one `(platform, room)` connection. The manager keeps the
//! registry of running listeners:
//! - `start` registers the key, spawns the listener and waits for it to connect
//! - `stop` cancels the listener and waits briefly for it to wind down
//! - a listener that exits on its own removes its registration
//!
//! Each registration carries a generation number, so a finishing task never
//! removes a newer registration for the same key.

mod runner;

pub use runner::HubListener;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use danmu_platforms::Platform;
use danmu_platforms::danmaku::{ConnectionStats, ConnectionStatsSnapshot, DanmakuError};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// What a listener is asked to do.
#[derive(Debug, Clone)]
pub struct ListenRequest {
    pub platform: Platform,
    pub room_id: String,
    pub cookie: Option<String>,
}

/// One-shot report from a listener that it is connected, or why it is not.
pub struct StartSignal(oneshot::Sender<std::result::Result<Arc<ConnectionStats>, DanmakuError>>);

impl StartSignal {
    pub fn ready(self, stats: Arc<ConnectionStats>) {
        let _ = self.0.send(Ok(stats));
    }

    pub fn failed(self, error: DanmakuError) {
        let _ = self.0.send(Err(error));
    }
}

/// Runs one room until cancelled or the stream ends.
#[async_trait]
pub trait RoomListener: Send + Sync + 'static {
    /// Reject platforms this listener cannot serve before anything is spawned.
    fn check(&self, _platform: Platform) -> Result<()> {
        Ok(())
    }

    async fn listen(&self, request: ListenRequest, started: StartSignal, cancel: CancellationToken);
}

#[derive(Debug, Clone)]
pub struct ListenerManagerConfig {
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for ListenerManagerConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Starting,
    Running,
}

/// Public view of a registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerStatus {
    pub platform: Platform,
    #[serde(rename = "rid")]
    pub room_id: String,
    pub state: ListenerState,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: ConnectionStatsSnapshot,
}

type Key = (Platform, String);

struct Registration {
    generation: u64,
    state: ListenerState,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    /// Cancelled once the listener task has returned.
    done: CancellationToken,
    stats: Option<Arc<ConnectionStats>>,
}

impl Registration {
    fn status(&self, key: &Key) -> ListenerStatus {
        ListenerStatus {
            platform: key.0,
            room_id: key.1.clone(),
            state: self.state,
            started_at: self.started_at,
            stats: self
                .stats
                .as_ref()
                .map(|s| s.snapshot())
                .unwrap_or_default(),
        }
    }
}

type Registry = Arc<RwLock<HashMap<Key, Registration>>>;

fn remove_generation(registry: &Registry, key: &Key, generation: u64) -> bool {
    let mut registry = registry.write();
    if registry.get(key).is_some_and(|r| r.generation == generation) {
        registry.remove(key);
        return true;
    }
    false
}

pub struct ListenerManager {
    config: ListenerManagerConfig,
    listener: Arc<dyn RoomListener>,
    registry: Registry,
    next_generation: AtomicU64,
    cancel: CancellationToken,
}

impl ListenerManager {
    pub fn new(config: ListenerManagerConfig, listener: Arc<dyn RoomListener>) -> Self {
        Self {
            config,
            listener,
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Start listening to a room and wait until it is connected.
    pub async fn start(
        &self,
        platform: Platform,
        room_id: &str,
        cookie: Option<String>,
    ) -> Result<ListenerStatus> {
        let room_id = room_id.trim();
        if !platform.validate_room_id(room_id) {
            return Err(Error::validation(format!(
                "invalid {platform} room id: {room_id:?}"
            )));
        }
        self.listener.check(platform)?;

        let key: Key = (platform, room_id.to_string());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        let done = CancellationToken::new();
        {
            let mut registry = self.registry.write();
            if registry.contains_key(&key) {
                return Err(Error::AlreadyListening {
                    platform,
                    room_id: key.1,
                });
            }
            registry.insert(
                key.clone(),
                Registration {
                    generation,
                    state: ListenerState::Starting,
                    started_at: Utc::now(),
                    cancel: cancel.clone(),
                    done: done.clone(),
                    stats: None,
                },
            );
        }

        let (tx, rx) = oneshot::channel();
        let request = ListenRequest {
            platform,
            room_id: key.1.clone(),
            cookie,
        };
        let listener = self.listener.clone();
        let registry = self.registry.clone();
        let task_key = key.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let _done = done.drop_guard();
            listener.listen(request, StartSignal(tx), task_cancel).await;
            if remove_generation(&registry, &task_key, generation) {
                info!(platform = %task_key.0, room_id = %task_key.1, "Listener exited");
            }
        });

        match tokio::time::timeout(self.config.start_timeout, rx).await {
            Ok(Ok(Ok(stats))) => {
                let mut registry = self.registry.write();
                match registry.get_mut(&key) {
                    Some(r) if r.generation == generation => {
                        r.state = ListenerState::Running;
                        r.stats = Some(stats);
                        info!(%platform, room_id = %key.1, "Listener started");
                        Ok(r.status(&key))
                    }
                    _ => Err(DanmakuError::connection("listener stopped while starting").into()),
                }
            }
            Ok(Ok(Err(e))) => {
                warn!(%platform, room_id = %key.1, error = %e, "Listener failed to start");
                cancel.cancel();
                remove_generation(&self.registry, &key, generation);
                Err(Error::StartupFailure(e))
            }
            Ok(Err(_)) => {
                remove_generation(&self.registry, &key, generation);
                Err(DanmakuError::connection("listener exited before connecting").into())
            }
            Err(_) => {
                warn!(%platform, room_id = %key.1, "Listener start timed out");
                cancel.cancel();
                remove_generation(&self.registry, &key, generation);
                Err(Error::StartTimeout {
                    platform,
                    room_id: key.1,
                })
            }
        }
    }

    /// Stop a listener. Returns `false` when nothing was registered.
    pub async fn stop(&self, platform: Platform, room_id: &str) -> bool {
        let key: Key = (platform, room_id.trim().to_string());
        let Some((generation, cancel, done)) = self
            .registry
            .read()
            .get(&key)
            .map(|r| (r.generation, r.cancel.clone(), r.done.clone()))
        else {
            return false;
        };

        cancel.cancel();
        if tokio::time::timeout(self.config.stop_timeout, done.cancelled())
            .await
            .is_err()
        {
            warn!(%platform, room_id = %key.1, "Listener did not stop in time");
        }
        remove_generation(&self.registry, &key, generation);
        info!(%platform, room_id = %key.1, "Listener stopped");
        true
    }

    pub fn get(&self, platform: Platform, room_id: &str) -> Option<ListenerStatus> {
        let key: Key = (platform, room_id.trim().to_string());
        self.registry.read().get(&key).map(|r| r.status(&key))
    }

    pub fn list(&self) -> Vec<ListenerStatus> {
        let mut list: Vec<_> = self
            .registry
            .read()
            .iter()
            .map(|(key, r)| r.status(key))
            .collect();
        list.sort_by(|a, b| (a.platform, &a.room_id).cmp(&(b.platform, &b.room_id)));
        list
    }

    pub fn list_platform(&self, platform: Platform) -> Vec<ListenerStatus> {
        self.list()
            .into_iter()
            .filter(|s| s.platform == platform)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every listener and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let pending: Vec<_> = self
            .registry
            .read()
            .values()
            .map(|r| r.done.clone())
            .collect();
        debug!("Waiting for {} listeners to stop", pending.len());
        let all_done = futures::future::join_all(pending.iter().map(|d| d.cancelled()));
        if tokio::time::timeout(self.config.stop_timeout, all_done)
            .await
            .is_err()
        {
            warn!("Some listeners did not stop in time");
        }
        self.registry.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted listener behaviour keyed by room id.
    struct ScriptedListener;

    #[async_trait]
    impl RoomListener for ScriptedListener {
        fn check(&self, platform: Platform) -> Result<()> {
            if platform == Platform::Huya {
                return Err(Error::config("no helper"));
            }
            Ok(())
        }

        async fn listen(&self, request: ListenRequest, started: StartSignal, cancel: CancellationToken) {
            match request.room_id.as_str() {
                "404" => started.failed(DanmakuError::room_not_found("404")),
                "111" => {
                    // Never reports, only cancellation ends it.
                    cancel.cancelled().await;
                }
                "222" => {
                    started.ready(Arc::new(ConnectionStats::default()));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                _ => {
                    started.ready(Arc::new(ConnectionStats::default()));
                    cancel.cancelled().await;
                }
            }
        }
    }

    fn manager() -> ListenerManager {
        ListenerManager::new(
            ListenerManagerConfig {
                start_timeout: Duration::from_millis(100),
                stop_timeout: Duration::from_millis(500),
            },
            Arc::new(ScriptedListener),
        )
    }

    #[tokio::test]
    async fn test_start_and_duplicate() {
        let manager = manager();
        let status = manager.start(Platform::Bilibili, "1000", None).await.unwrap();
        assert_eq!(status.state, ListenerState::Running);
        assert_eq!(status.room_id, "1000");

        let dup = manager.start(Platform::Bilibili, " 1000 ", None).await;
        assert!(matches!(dup, Err(Error::AlreadyListening { .. })));
        assert_eq!(manager.len(), 1);

        // Same room on another platform is a different key.
        manager.start(Platform::Douyu, "1000", None).await.unwrap();
        assert_eq!(manager.list().len(), 2);
        assert_eq!(manager.list_platform(Platform::Douyu).len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_room_id() {
        let manager = manager();
        let err = manager.start(Platform::Douyin, "abc", None).await;
        assert!(matches!(err, Err(Error::Validation(_))));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_platform() {
        let manager = manager();
        let err = manager.start(Platform::Huya, "kaerlol", None).await;
        assert!(matches!(err, Err(Error::Configuration(_))));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_stop() {
        let manager = manager();
        assert!(!manager.stop(Platform::Bilibili, "1000").await);

        manager.start(Platform::Bilibili, "1000", None).await.unwrap();
        assert!(manager.get(Platform::Bilibili, "1000").is_some());
        assert!(manager.stop(Platform::Bilibili, "1000").await);
        assert!(manager.get(Platform::Bilibili, "1000").is_none());
        assert!(!manager.stop(Platform::Bilibili, "1000").await);
    }

    #[tokio::test]
    async fn test_start_failure_removes_entry() {
        let manager = manager();
        let err = manager.start(Platform::Douyu, "404", None).await;
        assert!(matches!(
            err,
            Err(Error::StartupFailure(DanmakuError::RoomNotFound(_)))
        ));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_start_timeout_cancels_listener() {
        let manager = manager();
        let err = manager.start(Platform::Douyu, "111", None).await;
        assert!(matches!(err, Err(Error::StartTimeout { .. })));
        assert!(manager.is_empty());

        // The key is free again.
        let err = manager.start(Platform::Douyu, "111", None).await;
        assert!(matches!(err, Err(Error::StartTimeout { .. })));
    }

    #[tokio::test]
    async fn test_exit_removes_registration() {
        let manager = manager();
        manager.start(Platform::Douyu, "222", None).await.unwrap();
        assert_eq!(manager.len(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let manager = manager();
        manager.start(Platform::Douyu, "1", None).await.unwrap();
        manager.start(Platform::Bilibili, "2", None).await.unwrap();
        manager.shutdown().await;
        assert!(manager.is_empty());
    }

    #[test]
    fn test_status_serialization() {
        let status = ListenerStatus {
            platform: Platform::Douyu,
            room_id: "9999".to_string(),
            state: ListenerState::Running,
            started_at: DateTime::from_timestamp(0, 0).unwrap(),
            stats: ConnectionStatsSnapshot::default(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["platform"], "douyu");
        assert_eq!(value["rid"], "9999");
        assert_eq!(value["state"], "running");
        assert_eq!(value["dropped_frames"], 0);
    }
}
