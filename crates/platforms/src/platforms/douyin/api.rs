//! Douyin web lookups: session cookie, room ids and the emoji catalog.

use regex::Regex;
use reqwest::Client;
use reqwest::header::{COOKIE, REFERER};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::danmaku::{DanmakuError, Result};
use crate::http::set_cookie_value;

pub const LIVE_DOUYIN_URL: &str = "https://live.douyin.com/";
const EMOJI_LIST_URL: &str = "https://www.douyin.com/aweme/v1/web/emoji/list";

/// The live page is only rendered when this nonce is present.
const AC_NONCE: &str = "0123407cc00a9e438deb4";

static ROOM_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"roomId\\":\\"(\d+)\\""#).unwrap());
static USER_UNIQUE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"user_unique_id\\":\\"(\d+)\\""#).unwrap());
static EMOJI_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\[\]]+\]").unwrap());

/// Identifiers scraped from the live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomIds {
    /// Internal room id used by the push service.
    pub room_id: String,
    pub user_unique_id: String,
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)?.get(1).map(|m| m.as_str().to_string())
}

/// Extract the room ids from the live page HTML.
pub fn parse_room_ids(html: &str) -> Option<RoomIds> {
    Some(RoomIds {
        room_id: capture(&ROOM_ID_REGEX, html)?,
        user_unique_id: capture(&USER_UNIQUE_ID_REGEX, html).unwrap_or_default(),
    })
}

/// Fetch a fresh `ttwid` cookie from the live landing page.
pub async fn fetch_ttwid(client: &Client) -> Result<String> {
    let response = client.get(LIVE_DOUYIN_URL).send().await?;
    set_cookie_value(response.headers(), "ttwid")
        .ok_or_else(|| DanmakuError::protocol("ttwid cookie not set by live.douyin.com"))
}

/// Resolve the public web room id into the push-service ids.
pub async fn fetch_room_ids(client: &Client, web_rid: &str, ttwid: &str) -> Result<RoomIds> {
    let html = client
        .get(format!("{LIVE_DOUYIN_URL}{web_rid}"))
        .header(COOKIE, format!("ttwid={ttwid}; __ac_nonce={AC_NONCE}"))
        .header(REFERER, LIVE_DOUYIN_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let ids = parse_room_ids(&html).ok_or_else(|| DanmakuError::room_not_found(web_rid))?;
    debug!(web_rid, room_id = %ids.room_id, "Resolved douyin room");
    Ok(ids)
}

#[derive(Debug, Deserialize)]
struct EmojiListResponse {
    #[serde(default)]
    emoji_list: Vec<Emoji>,
}

#[derive(Debug, Deserialize)]
struct Emoji {
    display_name: String,
    emoji_url: EmojiUrl,
}

#[derive(Debug, Deserialize)]
struct EmojiUrl {
    #[serde(default)]
    url_list: Vec<String>,
}

/// Maps `[label]` tokens to emoji image URLs.
#[derive(Debug, Clone, Default)]
pub struct EmojiCatalog {
    urls: FxHashMap<String, String>,
}

impl EmojiCatalog {
    pub fn from_json(body: &str) -> Result<Self> {
        let response: EmojiListResponse = serde_json::from_str(body)?;
        let urls = response
            .emoji_list
            .into_iter()
            .filter_map(|e| Some((e.display_name, e.emoji_url.url_list.into_iter().next()?)))
            .collect();
        Ok(Self { urls })
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Image URLs for every known `[label]` token in `content`, in order.
    pub fn resolve(&self, content: &str) -> Vec<String> {
        EMOJI_TOKEN_REGEX
            .find_iter(content)
            .filter_map(|m| self.urls.get(m.as_str()).cloned())
            .collect()
    }
}

pub async fn fetch_emoji_catalog(client: &Client) -> Result<EmojiCatalog> {
    let body = client
        .get(EMOJI_LIST_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let catalog = EmojiCatalog::from_json(&body)?;
    debug!("Loaded {} douyin emojis", catalog.len());
    Ok(catalog)
}
