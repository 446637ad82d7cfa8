//! Bilibili live HTTP lookups.

use reqwest::Client;
use reqwest::header::{COOKIE, REFERER};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::danmaku::{DanmakuError, GiftCatalog, GiftInfo, Result};

use super::wbi::WbiSigner;

pub const DEFAULT_WS_URL: &str = "wss://broadcastlv.chat.bilibili.com/sub";
const LIVE_REFERER: &str = "https://live.bilibili.com";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomInfo {
    pub room_id: u64,
    #[serde(default)]
    pub short_id: u64,
    #[serde(default)]
    pub uid: u64,
    /// 0 offline, 1 live, 2 rotating replays.
    #[serde(default)]
    pub live_status: u8,
    #[serde(default)]
    pub title: String,
}

/// Look up a room by its public (possibly short) id.
pub async fn fetch_room_info(client: &Client, room_id: &str) -> Result<RoomInfo> {
    let resp: ApiResponse<RoomInfo> = client
        .get("https://api.live.bilibili.com/room/v1/Room/get_info")
        .query(&[("room_id", room_id)])
        .header(REFERER, LIVE_REFERER)
        .send()
        .await?
        .json()
        .await?;

    match resp.data {
        Some(info) if resp.code == 0 && info.room_id != 0 => Ok(info),
        _ => {
            debug!(room_id, code = resp.code, message = %resp.message, "Room lookup failed");
            Err(DanmakuError::room_not_found(room_id))
        }
    }
}

/// WebSocket endpoint and auth token for a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanmuInfo {
    pub url: String,
    pub token: String,
}

impl Default for DanmuInfo {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            token: String::new(),
        }
    }
}

fn parse_danmu_info(json: &Value) -> DanmuInfo {
    if json.get("code").and_then(Value::as_i64) != Some(0) {
        return DanmuInfo::default();
    }
    let Some(data) = json.get("data") else {
        return DanmuInfo::default();
    };

    let token = data
        .get("token")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let url = data
        .get("host_list")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(|host| {
            let h = host.get("host")?.as_str()?;
            let p = host.get("wss_port")?.as_u64()?;
            Some(format!("wss://{h}:{p}/sub"))
        })
        .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
    DanmuInfo { url, token }
}

/// Fetch the danmu server and token. API errors fall back to the public server
/// with an empty token.
pub async fn fetch_danmu_info(
    client: &Client,
    signer: &WbiSigner,
    room_id: u64,
    cookies: Option<&str>,
) -> Result<DanmuInfo> {
    let query = signer
        .sign(
            client,
            vec![
                ("id", room_id.to_string()),
                ("type", "0".to_string()),
                ("web_location", "444.8".to_string()),
            ],
        )
        .await?;

    let mut request = client
        .get(format!(
            "https://api.live.bilibili.com/xlive/web-room/v1/index/getDanmuInfo?{query}"
        ))
        .header(REFERER, LIVE_REFERER);
    if let Some(cookies) = cookies {
        request = request.header(COOKIE, cookies);
    }
    let json: Value = request.send().await?.json().await?;
    let info = parse_danmu_info(&json);
    debug!(room_id, url = %info.url, "Resolved bilibili danmu server");
    Ok(info)
}

#[derive(Debug, Deserialize)]
struct GiftConfig {
    #[serde(default)]
    list: Vec<GiftConfigItem>,
}

#[derive(Debug, Deserialize)]
struct GiftConfigItem {
    name: String,
    #[serde(default)]
    img_basic: String,
    #[serde(default)]
    price: u64,
}

fn parse_gift_config(body: &str) -> Result<GiftCatalog> {
    let resp: ApiResponse<GiftConfig> = serde_json::from_str(body)?;
    let list = resp.data.map(|d| d.list).unwrap_or_default();
    Ok(list
        .into_iter()
        .map(|g| {
            (
                g.name.clone(),
                GiftInfo {
                    name: g.name,
                    icon: g.img_basic,
                    price: g.price as f64 / 1000.0,
                },
            )
        })
        .collect())
}

/// Gift panel keyed by gift name.
pub async fn fetch_gift_catalog(client: &Client, room_id: u64) -> Result<GiftCatalog> {
    let body = client
        .get("https://api.live.bilibili.com/xlive/web-room/v1/giftPanel/giftConfig")
        .query(&[("platform", "pc".to_string()), ("room_id", room_id.to_string())])
        .header(REFERER, LIVE_REFERER)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let catalog = parse_gift_config(&body)?;
    debug!(room_id, "Loaded {} bilibili gifts", catalog.len());
    Ok(catalog)
}

#[derive(Debug, Deserialize)]
struct UserCard {
    card: Card,
}

#[derive(Debug, Deserialize)]
struct Card {
    #[serde(default)]
    face: String,
}

/// Avatar URL of a user.
pub async fn fetch_user_face(client: &Client, mid: u64) -> Result<String> {
    let resp: ApiResponse<UserCard> = client
        .get("https://api.bilibili.com/x/web-interface/card")
        .query(&[("mid", mid)])
        .header(REFERER, "https://www.bilibili.com/")
        .send()
        .await?
        .json()
        .await?;
    match resp.data {
        Some(user) if resp.code == 0 => Ok(user.card.face),
        _ => Err(DanmakuError::protocol(format!(
            "user card {mid}: {} {}",
            resp.code, resp.message
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_danmu_info() {
        let json = json!({
            "code": 0,
            "data": {
                "token": "abc",
                "host_list": [{"host": "zj-cn-live-comet.chat.bilibili.com", "wss_port": 2245}]
            }
        });
        assert_eq!(
            parse_danmu_info(&json),
            DanmuInfo {
                url: "wss://zj-cn-live-comet.chat.bilibili.com:2245/sub".to_string(),
                token: "abc".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_danmu_info_falls_back() {
        let json = json!({"code": -352, "message": "风控校验失败"});
        assert_eq!(parse_danmu_info(&json), DanmuInfo::default());

        let json = json!({"code": 0, "data": {"token": "t", "host_list": []}});
        let info = parse_danmu_info(&json);
        assert_eq!(info.url, DEFAULT_WS_URL);
        assert_eq!(info.token, "t");
    }

    #[test]
    fn test_parse_gift_config() {
        let body = r#"{"code":0,"data":{"list":[
            {"id":1,"name":"辣条","img_basic":"https://s1.hdslb.com/latiao.png","price":100},
            {"id":2,"name":"小心心","price":0}
        ]}}"#;
        let catalog = parse_gift_config(body).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.icon("辣条"), "https://s1.hdslb.com/latiao.png");
        assert_eq!(catalog.get("辣条").map(|g| g.price), Some(0.1));
        assert_eq!(catalog.icon("missing"), "");
    }
}
