//! Kuaishou share-page lookups.

use regex::Regex;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::LazyLock;
use tracing::debug;

use crate::danmaku::{DanmakuError, GiftCatalog, GiftInfo, Result};
use crate::http::{DEFAULT_UA, MOBILE_UA};

const SHARE_URL: &str = "https://v.kuaishou.com";
const H5_ORIGIN: &str = "https://v.m.chenzhongtech.com";
const BY_USER_URL: &str =
    "https://v.m.chenzhongtech.com/rest/k/live/byUser?kpn=KUAISHOU&kpf=OUTSIDE_IOS_H5&captchaToken=";
const GIFT_LIST_URL: &str = "https://v.m.chenzhongtech.com/rest/wd/live/gift/all";
const GRAPHQL_URL: &str = "https://www.kuaishou.com/graphql";

const VISION_PROFILE_QUERY: &str = "query visionProfile($userId: String) { visionProfile(userId: $userId) { result hostName userProfile { profile { user_name user_id headurl } } } }";

static LIVE_EID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/fw/live/(\w+)\?").unwrap());
static PHOTO_EID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/fw/photo/(\w+)\?").unwrap());

/// Share-page id from the final URL of a share-link redirect.
pub fn parse_eid(url: &str) -> Option<String> {
    [&*LIVE_EID_REGEX, &*PHOTO_EID_REGEX]
        .into_iter()
        .find_map(|re| re.captures(url)?.get(1))
        .map(|m| m.as_str().to_string())
}

/// Follow `v.kuaishou.com/<code>` and return the share page URL with its eid.
pub async fn resolve_share_link(client: &Client, code: &str) -> Result<(String, String)> {
    let resp = client
        .get(format!("{SHARE_URL}/{}", code.trim()))
        .header(USER_AGENT, MOBILE_UA)
        .send()
        .await?
        .error_for_status()?;
    let live_url = resp.url().to_string();
    let eid = parse_eid(&live_url).ok_or_else(|| DanmakuError::room_not_found(code))?;
    debug!(code, eid, "Resolved kuaishou share link");
    Ok((live_url, eid))
}

/// Session parameters for the live socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub token: String,
    pub live_stream_id: String,
    pub websocket_url: String,
}

fn parse_live_session(json: &Value) -> Option<LiveSession> {
    if json.get("result").and_then(Value::as_i64) != Some(1) {
        return None;
    }
    let websocket_url = json
        .get("webSocketAddresses")?
        .as_array()?
        .first()?
        .as_str()?
        .to_string();
    Some(LiveSession {
        token: json.get("token")?.as_str()?.to_string(),
        live_stream_id: json
            .pointer("/liveStream/liveStreamId")?
            .as_str()?
            .to_string(),
        websocket_url,
    })
}

/// Fetch the token, stream id and socket address of a live share page.
/// An offline streamer has no socket address and resolves to `RoomNotFound`.
pub async fn fetch_live_session(client: &Client, live_url: &str, eid: &str) -> Result<LiveSession> {
    let body = json!({
        "source": 6,
        "eid": eid,
        "shareMethod": "card",
        "clientType": "WEB_OUTSIDE_SHARE_H5",
    });
    let json: Value = client
        .post(BY_USER_URL)
        .header(USER_AGENT, MOBILE_UA)
        .header(ORIGIN, H5_ORIGIN)
        .header(REFERER, live_url)
        .json(&body)
        .send()
        .await?
        .json()
        .await?;

    parse_live_session(&json).ok_or_else(|| {
        debug!(eid, result = ?json.get("result"), "No kuaishou live session");
        DanmakuError::room_not_found(eid)
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GiftList {
    result: i64,
    #[serde(default)]
    gifts: Vec<GiftItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GiftItem {
    id: u64,
    name: String,
    #[serde(default)]
    unit_price: u64,
    #[serde(default)]
    pic_url: Vec<PicUrl>,
}

#[derive(Debug, Deserialize)]
struct PicUrl {
    url: String,
}

fn parse_gift_list(body: &str) -> Result<GiftCatalog> {
    let list: GiftList = serde_json::from_str(body)?;
    if list.result != 1 {
        return Err(DanmakuError::protocol(format!(
            "kuaishou gift list result {}",
            list.result
        )));
    }
    Ok(list
        .gifts
        .into_iter()
        .map(|g| {
            (
                g.id.to_string(),
                GiftInfo {
                    icon: g.pic_url.into_iter().next().map(|p| p.url).unwrap_or_default(),
                    name: g.name,
                    price: g.unit_price as f64,
                },
            )
        })
        .collect())
}

/// Gift list keyed by gift id.
pub async fn fetch_gift_catalog(client: &Client) -> Result<GiftCatalog> {
    let body = client
        .post(GIFT_LIST_URL)
        .header(USER_AGENT, MOBILE_UA)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let catalog = parse_gift_list(&body)?;
    debug!("Loaded {} kuaishou gifts", catalog.len());
    Ok(catalog)
}

fn parse_profile_avatar(json: &Value) -> Option<String> {
    json.pointer("/data/visionProfile/userProfile/profile/headurl")?
        .as_str()
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// Profile avatar of a user. The GraphQL endpoint needs a logged-in cookie.
pub async fn fetch_user_avatar(client: &Client, principal_id: &str, cookie: &str) -> Result<String> {
    let payload = json!({
        "operationName": "visionProfile",
        "variables": { "userId": principal_id },
        "query": VISION_PROFILE_QUERY,
    });
    let json: Value = client
        .post(GRAPHQL_URL)
        .header(USER_AGENT, DEFAULT_UA)
        .header(CONTENT_TYPE, "application/json")
        .header(COOKIE, cookie)
        .json(&payload)
        .send()
        .await?
        .json()
        .await?;
    parse_profile_avatar(&json)
        .ok_or_else(|| DanmakuError::protocol(format!("no kuaishou profile for {principal_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_eid() {
        assert_eq!(
            parse_eid("https://v.m.chenzhongtech.com/fw/live/3xkz5xbdm2tcf9q?cc=share_copylink&userId=1").as_deref(),
            Some("3xkz5xbdm2tcf9q")
        );
        assert_eq!(
            parse_eid("https://v.m.chenzhongtech.com/fw/photo/3xabc?fid=2").as_deref(),
            Some("3xabc")
        );
        assert_eq!(parse_eid("https://www.kuaishou.com/"), None);
    }

    #[test]
    fn test_parse_live_session() {
        let json = json!({
            "result": 1,
            "token": "tok",
            "liveStream": {"liveStreamId": "ABCdef123"},
            "webSocketAddresses": ["wss://live-ws-pg-group3.kuaishou.com/websocket"]
        });
        assert_eq!(
            parse_live_session(&json),
            Some(LiveSession {
                token: "tok".to_string(),
                live_stream_id: "ABCdef123".to_string(),
                websocket_url: "wss://live-ws-pg-group3.kuaishou.com/websocket".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_live_session_offline() {
        let offline = json!({"result": 1, "token": "tok", "liveStream": {"liveStreamId": "x"}});
        assert_eq!(parse_live_session(&offline), None);
        let captcha = json!({"result": 2});
        assert_eq!(parse_live_session(&captcha), None);
    }

    #[test]
    fn test_parse_gift_list() {
        let body = r#"{"result":1,"gifts":[
            {"id":1,"name":"荧光棒","unitPrice":1,"picUrl":[{"cdn":"a","url":"https://k/1.png"}]},
            {"id":2,"name":"啤酒","unitPrice":10,"picUrl":[]}
        ]}"#;
        let catalog = parse_gift_list(body).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.icon("1"), "https://k/1.png");
        assert_eq!(catalog.get("2").map(|g| g.price), Some(10.0));
        assert_eq!(catalog.icon("2"), "");

        assert!(parse_gift_list(r#"{"result":0}"#).is_err());
    }

    #[test]
    fn test_parse_profile_avatar() {
        let json = json!({"data": {"visionProfile": {"userProfile": {"profile": {"headurl": "https://k/a.jpg"}}}}});
        assert_eq!(parse_profile_avatar(&json).as_deref(), Some("https://k/a.jpg"));
        assert_eq!(parse_profile_avatar(&json!({"data": null})), None);
    }
}
