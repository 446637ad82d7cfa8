//! Image proxy.
//!
//! Platform CDNs reject hot-linked avatars and gift icons, so published URLs can
//! be rewritten to go through this process. Fetched images are kept in a
//! bounded in-memory cache.

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Where the proxy is reachable from subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProxyConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub https: bool,
}

impl Default for ImageProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8888,
            https: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub content_type: String,
    pub data: Bytes,
}

struct CacheEntry {
    image: CachedImage,
    inserted: Instant,
    last_used: u64,
}

/// Bounded cache evicting the least recently used entry once full.
struct ImageCache {
    capacity: usize,
    ttl: Duration,
    tick: u64,
    entries: HashMap<String, CacheEntry>,
}

impl ImageCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, url: &str) -> Option<CachedImage> {
        self.tick += 1;
        let tick = self.tick;
        let ttl = self.ttl;
        match self.entries.get_mut(url) {
            Some(entry) if entry.inserted.elapsed() < ttl => {
                entry.last_used = tick;
                Some(entry.image.clone())
            }
            Some(_) => {
                self.entries.remove(url);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, url: String, image: CachedImage) {
        self.tick += 1;
        if !self.entries.contains_key(&url) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            url,
            CacheEntry {
                image,
                inserted: Instant::now(),
                last_used: self.tick,
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct ImageProxy {
    config: ImageProxyConfig,
    client: Client,
    cache: Mutex<ImageCache>,
}

impl ImageProxy {
    pub fn new(config: ImageProxyConfig, client: Client) -> Self {
        Self::with_cache(config, client, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache(
        config: ImageProxyConfig,
        client: Client,
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            config,
            client,
            cache: Mutex::new(ImageCache::new(capacity, ttl)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Point `url` at this proxy. Returned unchanged when the proxy is
    /// disabled or the input is empty.
    pub fn rewrite(&self, url: &str) -> String {
        if !self.config.enabled || url.is_empty() {
            return url.to_string();
        }
        let scheme = if self.config.https { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}/image?url={}",
            self.config.host,
            self.config.port,
            urlencoding::encode(url)
        )
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Serve `url` from the cache, fetching it on a miss.
    pub async fn get(&self, url: &str) -> Result<CachedImage> {
        let cached = self.cache.lock().get(url);
        if let Some(image) = cached {
            return Ok(image);
        }

        let target = url::Url::parse(url)
            .map_err(|e| Error::validation(format!("invalid image url: {e}")))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "unsupported image url scheme: {}",
                target.scheme()
            )));
        }

        let resp = self
            .client
            .get(target)
            .header(USER_AGENT, danmu_platforms::http::DEFAULT_UA)
            .send()
            .await?
            .error_for_status()?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image") {
            return Err(Error::validation(format!(
                "upstream is not an image: {content_type:?}"
            )));
        }
        let data = resp.bytes().await?;
        debug!(url, bytes = data.len(), "Cached proxied image");

        let image = CachedImage { content_type, data };
        self.cache.lock().insert(url.to_string(), image.clone());
        Ok(image)
    }
}
