//! Mapping of platform events to [`MessageData`].
//!
//! Each platform gets one normalizer, built once per listener. Building one
//! loads the room's gift catalog; catalog and avatar lookups that fail leave
//! the affected fields empty rather than dropping the message.

mod bilibili;
mod douyin;
mod douyu;
mod huya;
mod kuaishou;

pub use bilibili::BilibiliNormalizer;
pub use douyin::DouyinNormalizer;
pub use douyu::DouyuNormalizer;
pub use huya::HuyaNormalizer;
pub use kuaishou::KuaishouNormalizer;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use crate::message::MessageData;
use crate::proxy::ImageProxy;

/// Shared inputs of every normalizer.
#[derive(Clone)]
pub struct NormalizeContext {
    pub room_id: String,
    pub client: Client,
    pub proxy: Arc<ImageProxy>,
    pub cookie: Option<String>,
}

impl NormalizeContext {
    pub fn image(&self, url: &str) -> String {
        self.proxy.rewrite(url)
    }

    pub fn images<I>(&self, urls: I) -> Vec<String>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        urls.into_iter().map(|u| self.image(u.as_ref())).collect()
    }
}

#[async_trait]
pub trait Normalizer: Send + Sync {
    type Event: Send + 'static;

    /// Map one event. `None` for events that are not forwarded.
    async fn normalize(&self, event: Self::Event) -> Option<MessageData>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::proxy::ImageProxyConfig;

    pub fn context(room_id: &str) -> NormalizeContext {
        let client = danmu_platforms::http::default_client().unwrap();
        NormalizeContext {
            room_id: room_id.to_string(),
            proxy: Arc::new(ImageProxy::new(ImageProxyConfig::default(), client.clone())),
            client,
            cookie: None,
        }
    }

    pub fn proxied_context(room_id: &str) -> NormalizeContext {
        let client = danmu_platforms::http::default_client().unwrap();
        let config = ImageProxyConfig {
            enabled: true,
            ..Default::default()
        };
        NormalizeContext {
            room_id: room_id.to_string(),
            proxy: Arc::new(ImageProxy::new(config, client.clone())),
            client,
            cookie: None,
        }
    }
}
