//! WBI request signing for `api.live.bilibili.com` endpoints.

use md5::{Digest, Md5};
use reqwest::Client;
use reqwest::header::REFERER;
use serde::Deserialize;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

use crate::danmaku::{DanmakuError, Result};

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";
const KEY_TTL: Duration = Duration::from_secs(2 * 60 * 60);

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

#[derive(Deserialize)]
struct NavResponse {
    data: NavData,
}

#[derive(Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

/// `https://i0.hdslb.com/bfs/wbi/<key>.png` -> `<key>`
fn file_stem(url: &str) -> Option<String> {
    let (_, name) = url.rsplit_once('/')?;
    let (stem, _) = name.rsplit_once('.')?;
    Some(stem.to_string())
}

fn mixin_key(keys: &WbiKeys) -> String {
    let raw: Vec<char> = format!("{}{}", keys.img_key, keys.sub_key).chars().collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| raw.get(i))
        .take(32)
        .collect()
}

/// Percent-encode like `encodeURIComponent`, dropping `!'()*`.
fn wbi_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            '!' | '\'' | '(' | ')' | '*' => {}
            _ => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    encoded
}

/// Signed query string: params sorted, `wts` added and `w_rid` appended.
pub fn sign_query(mut params: Vec<(&str, String)>, keys: &WbiKeys, timestamp: u64) -> String {
    params.push(("wts", timestamp.to_string()));
    params.sort_by(|a, b| a.0.cmp(b.0));
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", wbi_encode(k), wbi_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let digest = Md5::digest(format!("{query}{}", mixin_key(keys)).as_bytes());
    format!("{query}&w_rid={digest:x}")
}

/// Caches the WBI keys from the nav endpoint.
#[derive(Debug, Default)]
pub struct WbiSigner {
    cached: Mutex<Option<(WbiKeys, Instant)>>,
}

impl WbiSigner {
    pub fn new() -> Self {
        Self::default()
    }

    async fn keys(&self, client: &Client) -> Result<WbiKeys> {
        let mut cached = self.cached.lock().await;
        if let Some((keys, fetched_at)) = cached.as_ref()
            && fetched_at.elapsed() < KEY_TTL
        {
            return Ok(keys.clone());
        }

        let nav: NavResponse = client
            .get(NAV_URL)
            .header(REFERER, "https://www.bilibili.com/")
            .send()
            .await?
            .json()
            .await?;
        let keys = WbiKeys {
            img_key: file_stem(&nav.data.wbi_img.img_url)
                .ok_or_else(|| DanmakuError::protocol("malformed wbi img_url"))?,
            sub_key: file_stem(&nav.data.wbi_img.sub_url)
                .ok_or_else(|| DanmakuError::protocol("malformed wbi sub_url"))?,
        };
        debug!("Refreshed WBI keys");
        *cached = Some((keys.clone(), Instant::now()));
        Ok(keys)
    }

    pub async fn sign(&self, client: &Client, params: Vec<(&str, String)>) -> Result<String> {
        let keys = self.keys(client).await?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(sign_query(params, &keys, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_query_known_vector() {
        let keys = WbiKeys {
            img_key: "7cd084941338484aae1ad9425b84077c".to_string(),
            sub_key: "4932caff0ff746eab6f01bf08b70ac45".to_string(),
        };
        let params = vec![
            ("foo", "114".to_string()),
            ("bar", "514".to_string()),
            ("zab", "1919810".to_string()),
        ];
        assert_eq!(
            sign_query(params, &keys, 1702204169),
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
        );
    }

    #[test]
    fn test_mixin_key() {
        let keys = WbiKeys {
            img_key: "7cd084941338484aae1ad9425b84077c".to_string(),
            sub_key: "4932caff0ff746eab6f01bf08b70ac45".to_string(),
        };
        assert_eq!(mixin_key(&keys), "ea1db124af3c7062474693fa704f4ff8");
    }

    #[test]
    fn test_wbi_encode() {
        assert_eq!(wbi_encode("a b!*"), "a%20b");
        assert_eq!(wbi_encode("直播"), "%E7%9B%B4%E6%92%AD");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(
            file_stem("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            Some("7cd084941338484aae1ad9425b84077c".to_string())
        );
        assert_eq!(file_stem("nothing"), None);
    }
}
