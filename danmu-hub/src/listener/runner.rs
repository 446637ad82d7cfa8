//! The production [`RoomListener`]: connect, normalize, publish.

use async_trait::async_trait;
use danmu_platforms::Platform;
use danmu_platforms::danmaku::{
    self, ConnectionConfig, DanmakuError, DanmuProtocol, HelperProcessSigner, SignatureProvider,
    WebSocketDanmuProvider, WebSocketProviderConfig,
};
use danmu_platforms::platforms::{bilibili, douyin, douyu, huya, kuaishou};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ListenRequest, ListenerManagerConfig, RoomListener, StartSignal};
use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::message::UnifiedMessage;
use crate::normalize::{
    BilibiliNormalizer, DouyinNormalizer, DouyuNormalizer, HuyaNormalizer, KuaishouNormalizer,
    NormalizeContext, Normalizer,
};
use crate::proxy::ImageProxy;

/// Events buffered between the connection and the normalizer.
const EVENT_BUFFER: usize = 256;

/// Part of the start timeout kept for the relay connection after the Huya
/// helper is up.
const HELPER_CONNECT_MARGIN: Duration = Duration::from_secs(2);

/// How long a Huya helper may take to bind, so that a slow helper fails the
/// start with its own error before the start timeout expires.
fn helper_ready_timeout(start_timeout: Duration) -> Duration {
    start_timeout
        .saturating_sub(HELPER_CONNECT_MARGIN)
        .max(Duration::from_secs(1))
}

pub struct HubListener {
    client: Client,
    hub: Arc<BroadcastHub>,
    proxy: Arc<ImageProxy>,
    websocket: WebSocketProviderConfig,
    huya_helper: Option<String>,
    start_timeout: Duration,
}

impl HubListener {
    pub fn new(
        client: Client,
        hub: Arc<BroadcastHub>,
        proxy: Arc<ImageProxy>,
        websocket: WebSocketProviderConfig,
        huya_helper: Option<String>,
    ) -> Self {
        Self {
            client,
            hub,
            proxy,
            websocket,
            huya_helper: huya_helper.filter(|h| !h.trim().is_empty()),
            start_timeout: ListenerManagerConfig::default().start_timeout,
        }
    }

    /// Match helper waits to the manager's start timeout.
    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = start_timeout;
        self
    }

    fn context(&self, request: &ListenRequest) -> NormalizeContext {
        NormalizeContext {
            room_id: request.room_id.clone(),
            client: self.client.clone(),
            proxy: self.proxy.clone(),
            cookie: request.cookie.clone().filter(|c| !c.trim().is_empty()),
        }
    }

    /// Connect, report the outcome, then pump events through the normalizer
    /// until the connection ends. Catalogs load after the start is reported;
    /// events arriving meanwhile wait in the channel.
    async fn drive<P, N, F>(
        &self,
        provider: WebSocketDanmuProvider<P>,
        load: F,
        request: ListenRequest,
        started: StartSignal,
        cancel: CancellationToken,
    ) where
        P: DanmuProtocol,
        N: Normalizer<Event = P::Event>,
        F: Future<Output = N> + Send,
    {
        let config = ConnectionConfig::with_cookies(request.cookie.clone())
            .with_websocket(self.websocket);
        let connection = match provider.connect(&request.room_id, config, &cancel).await {
            Ok(connection) => connection,
            Err(e) => {
                started.failed(e);
                return;
            }
        };
        started.ready(connection.stats());

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let hub = &self.hub;
        let publish = async {
            let normalizer = load.await;
            let mut published = 0u64;
            while let Some(event) = rx.recv().await {
                if let Some(data) = normalizer.normalize(event).await {
                    hub.publish(&UnifiedMessage::new(
                        request.platform,
                        request.room_id.as_str(),
                        data,
                    ));
                    published += 1;
                }
            }
            published
        };
        let (end, published) = tokio::join!(connection.run(tx, cancel.clone()), publish);
        info!(
            platform = %request.platform,
            room_id = %request.room_id,
            ?end,
            published,
            "Listener finished"
        );
    }

    fn huya_signer(&self) -> danmaku::Result<Arc<dyn SignatureProvider>> {
        let helper = self
            .huya_helper
            .as_deref()
            .ok_or_else(|| DanmakuError::signature("no huya helper configured"))?;
        let signer = HelperProcessSigner::new(helper)?
            .with_ready_timeout(helper_ready_timeout(self.start_timeout));
        Ok(Arc::new(signer))
    }
}

#[async_trait]
impl RoomListener for HubListener {
    fn check(&self, platform: Platform) -> Result<()> {
        if platform == Platform::Huya && self.huya_helper.is_none() {
            return Err(Error::config("huya requires --huya-helper"));
        }
        Ok(())
    }

    async fn listen(&self, request: ListenRequest, started: StartSignal, cancel: CancellationToken) {
        let ctx = self.context(&request);
        let ws = Some(self.websocket);
        debug!(platform = %request.platform, room_id = %request.room_id, "Listener spawned");

        match request.platform {
            Platform::Bilibili => {
                let provider = bilibili::create_bilibili_danmu_provider(
                    self.client.clone(),
                    ctx.cookie.clone(),
                    ws,
                );
                self.drive(provider, BilibiliNormalizer::load(ctx), request, started, cancel)
                    .await
            }
            Platform::Douyin => {
                let provider = douyin::create_douyin_danmu_provider(
                    self.client.clone(),
                    ctx.cookie.clone(),
                    ws,
                );
                self.drive(provider, DouyinNormalizer::load(ctx), request, started, cancel)
                    .await
            }
            Platform::Douyu => {
                let provider = douyu::create_douyu_danmu_provider(ctx.cookie.clone(), ws);
                self.drive(provider, DouyuNormalizer::load(ctx), request, started, cancel)
                    .await
            }
            Platform::Kuaishou => {
                let provider = kuaishou::create_kuaishou_danmu_provider(
                    self.client.clone(),
                    ctx.cookie.clone(),
                    ws,
                );
                self.drive(provider, KuaishouNormalizer::load(ctx), request, started, cancel)
                    .await
            }
            Platform::Huya => match self.huya_signer() {
                Ok(signer) => {
                    let provider = huya::create_huya_danmu_provider(signer, ws);
                    let load = async move { HuyaNormalizer::new(ctx) };
                    self.drive(provider, load, request, started, cancel).await
                }
                Err(e) => {
                    warn!(room_id = %request.room_id, error = %e, "Huya helper failed");
                    started.failed(e)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ImageProxyConfig;

    fn listener(huya_helper: Option<&str>) -> HubListener {
        let client = danmu_platforms::http::default_client().unwrap();
        HubListener::new(
            client.clone(),
            Arc::new(BroadcastHub::new()),
            Arc::new(ImageProxy::new(ImageProxyConfig::default(), client)),
            WebSocketProviderConfig::default(),
            huya_helper.map(str::to_string),
        )
    }

    #[test]
    fn test_huya_requires_helper() {
        assert!(matches!(
            listener(None).check(Platform::Huya),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            listener(Some("  ")).check(Platform::Huya),
            Err(Error::Configuration(_))
        ));
        assert!(listener(Some("huya-relay --room {room} --port {port}"))
            .check(Platform::Huya)
            .is_ok());
        assert!(listener(None).check(Platform::Bilibili).is_ok());
    }

    #[test]
    fn test_helper_wait_fits_in_start_timeout() {
        assert_eq!(helper_ready_timeout(Duration::from_secs(10)), Duration::from_secs(8));
        assert_eq!(helper_ready_timeout(Duration::from_secs(30)), Duration::from_secs(28));
        assert_eq!(helper_ready_timeout(Duration::from_secs(1)), Duration::from_secs(1));

        let listener = listener(Some("huya-relay --room {room} --port {port}"))
            .with_start_timeout(Duration::from_secs(10));
        assert!(listener.huya_signer().is_ok());
        assert!(
            helper_ready_timeout(listener.start_timeout) < listener.start_timeout,
            "helper wait must end before the start timeout"
        );
    }

    #[test]
    fn test_context_drops_blank_cookie() {
        let listener = listener(None);
        let ctx = listener.context(&ListenRequest {
            platform: Platform::Kuaishou,
            room_id: "3xabc".to_string(),
            cookie: Some(" ".to_string()),
        });
        assert_eq!(ctx.cookie, None);
        assert_eq!(ctx.room_id, "3xabc");
    }
}
