//! Bilibili (哔哩哔哩) danmu protocol.
//!
//! Binary packets with a 16-byte big-endian header. Notification bodies are
//! JSON, optionally wrapped in a zlib or brotli compressed batch of packets.

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace};

use crate::Platform;
use crate::danmaku::websocket::{
    DanmuProtocol, DecodedFrame, WebSocketDanmuProvider, cookie_value,
};
use crate::danmaku::{DanmakuError, Result, WebSocketProviderConfig};
use crate::http::DEFAULT_UA;

use super::api::{self, DanmuInfo};
use super::wbi::WbiSigner;

const HEADER_LEN: usize = 16;
const HEARTBEAT_INTERVAL_SECS: u64 = 30;
const HEARTBEAT_BODY: &[u8] = b"[object Object]";

/// Operation codes
mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const NOTIFICATION: u32 = 5;
    pub const AUTH: u32 = 7;
    pub const AUTH_REPLY: u32 = 8;
}

/// Protocol versions
mod ver {
    pub const RAW_JSON: u16 = 0;
    pub const POPULARITY: u16 = 1;
    pub const ZLIB: u16 = 2;
    pub const BROTLI: u16 = 3;
}

static FACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""face":"(https?://[^"]+)""#).unwrap());
static EMOTICON_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"url\\?":\\?"(https?://[^"]+\.png)\\?",\\?"width\\?""#).unwrap()
});

/// First `"face":"…"` URL in a raw notification.
pub fn extract_face_url(raw: &str) -> Option<String> {
    FACE_REGEX
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Emoticon image URLs in a raw notification.
pub fn extract_emoticon_urls(raw: &str) -> Vec<String> {
    EMOTICON_REGEX
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn guard_level_name(level: u64) -> &'static str {
    match level {
        3 => "舰长",
        2 => "提督",
        1 => "总督",
        _ => "未知等级",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BilibiliDanmaku {
    pub uid: u64,
    pub uname: String,
    pub content: String,
    /// The whole `DANMU_MSG` command.
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BilibiliGift {
    pub uid: u64,
    pub uname: String,
    pub face: String,
    pub gift_name: String,
    pub num: u64,
    /// Unit price in gold seeds (1000 = ¥1).
    pub price: u64,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BilibiliGuardBuy {
    pub uid: u64,
    pub username: String,
    pub guard_level: u64,
    pub price: u64,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BilibiliSuperChat {
    pub uid: u64,
    pub uname: String,
    pub face: String,
    pub message: String,
    /// Price in yuan.
    pub price: f64,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BilibiliUser {
    pub uid: u64,
    pub uname: String,
    pub raw: Value,
}

/// Events emitted by the Bilibili protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BilibiliEvent {
    Danmaku(BilibiliDanmaku),
    Gift(BilibiliGift),
    GuardBuy(BilibiliGuardBuy),
    SuperChat(BilibiliSuperChat),
    Like(BilibiliUser),
    Interact(BilibiliUser),
    Preparing(Value),
}

fn u64_field(v: &Value, key: &str) -> u64 {
    v.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .unwrap_or(0)
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl BilibiliEvent {
    /// Map one notification body to an event.
    pub fn from_notification(json: Value) -> Option<Self> {
        let cmd = json.get("cmd")?.as_str()?;
        // DANMU_MSG variants carry suffixes like "DANMU_MSG:4:0:2:2:2:0"
        let cmd = cmd.split(':').next().unwrap_or(cmd).to_string();

        let event = match cmd.as_str() {
            "DANMU_MSG" => {
                let info = json.get("info")?.as_array()?;
                let content = info.get(1)?.as_str()?.to_string();
                let user = info.get(2)?.as_array()?;
                let uid = user.first().and_then(Value::as_u64).unwrap_or(0);
                let uname = user
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self::Danmaku(BilibiliDanmaku {
                    uid,
                    uname,
                    content,
                    raw: json,
                })
            }
            "SEND_GIFT" => {
                let data = json.get("data")?;
                Self::Gift(BilibiliGift {
                    uid: u64_field(data, "uid"),
                    uname: str_field(data, "uname"),
                    face: str_field(data, "face"),
                    gift_name: str_field(data, "giftName"),
                    num: u64_field(data, "num").max(1),
                    price: u64_field(data, "price"),
                    raw: data.clone(),
                })
            }
            "GUARD_BUY" => {
                let data = json.get("data")?;
                Self::GuardBuy(BilibiliGuardBuy {
                    uid: u64_field(data, "uid"),
                    username: str_field(data, "username"),
                    guard_level: u64_field(data, "guard_level"),
                    price: u64_field(data, "price"),
                    raw: data.clone(),
                })
            }
            "SUPER_CHAT_MESSAGE" => {
                let data = json.get("data")?;
                let user_info = data.get("user_info");
                Self::SuperChat(BilibiliSuperChat {
                    uid: u64_field(data, "uid"),
                    uname: user_info.map(|u| str_field(u, "uname")).unwrap_or_default(),
                    face: user_info.map(|u| str_field(u, "face")).unwrap_or_default(),
                    message: str_field(data, "message"),
                    price: data.get("price").and_then(Value::as_f64).unwrap_or(0.0),
                    raw: data.clone(),
                })
            }
            "LIKE_INFO_V3_CLICK" | "INTERACT_WORD" => {
                let data = json.get("data")?;
                let user = BilibiliUser {
                    uid: u64_field(data, "uid"),
                    uname: str_field(data, "uname"),
                    raw: data.clone(),
                };
                if cmd == "INTERACT_WORD" {
                    Self::Interact(user)
                } else {
                    Self::Like(user)
                }
            }
            "PREPARING" => Self::Preparing(json.get("data").cloned().unwrap_or(json)),
            other => {
                trace!("Ignored bilibili command: {}", other);
                return None;
            }
        };
        Some(event)
    }
}

/// Build a packet with the given body and operation code.
pub fn encode_packet(body: &[u8], operation: u32) -> Bytes {
    let mut packet = vec![0u8; HEADER_LEN];
    BigEndian::write_u32(&mut packet[0..4], (HEADER_LEN + body.len()) as u32);
    BigEndian::write_u16(&mut packet[4..6], HEADER_LEN as u16);
    BigEndian::write_u16(&mut packet[6..8], ver::POPULARITY);
    BigEndian::write_u32(&mut packet[8..12], operation);
    BigEndian::write_u32(&mut packet[12..16], 1);
    packet.extend_from_slice(body);
    Bytes::from(packet)
}

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub operation: u32,
    pub body: Vec<u8>,
}

fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| DanmakuError::protocol(format!("zlib decompression failed: {e}")))?;
    Ok(decompressed)
}

fn decompress_brotli(data: &[u8]) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut decompressed)
        .map_err(|e| DanmakuError::protocol(format!("brotli decompression failed: {e}")))?;
    Ok(decompressed)
}

/// Split a frame into packets, unpacking compressed batches.
pub fn decode_packets(data: &[u8]) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < HEADER_LEN {
            return Err(DanmakuError::protocol(format!(
                "truncated packet header ({} bytes)",
                rest.len()
            )));
        }
        let packet_len = BigEndian::read_u32(&rest[0..4]) as usize;
        let header_len = BigEndian::read_u16(&rest[4..6]) as usize;
        let version = BigEndian::read_u16(&rest[6..8]);
        let operation = BigEndian::read_u32(&rest[8..12]);
        if packet_len < header_len || header_len < HEADER_LEN || packet_len > rest.len() {
            return Err(DanmakuError::protocol(format!(
                "bad packet length {packet_len} (header {header_len}, have {})",
                rest.len()
            )));
        }

        let body = &rest[header_len..packet_len];
        match version {
            ver::ZLIB if operation == op::NOTIFICATION => {
                packets.extend(decode_packets(&decompress_zlib(body)?)?)
            }
            ver::BROTLI if operation == op::NOTIFICATION => {
                packets.extend(decode_packets(&decompress_brotli(body)?)?)
            }
            ver::RAW_JSON | ver::POPULARITY | ver::ZLIB | ver::BROTLI => packets.push(Packet {
                operation,
                body: body.to_vec(),
            }),
            other => debug!("Unknown protocol version: {}", other),
        }
        rest = &rest[packet_len..];
    }

    Ok(packets)
}

#[derive(Serialize)]
struct AuthBody<'a> {
    uid: u64,
    roomid: u64,
    protover: u8,
    buvid: &'a str,
    platform: &'static str,
    #[serde(rename = "type")]
    auth_type: u8,
    key: &'a str,
}

/// Generates a fake BUVID3 identifier (`XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXXinfoc`).
pub fn generate_fake_buvid3() -> String {
    let u = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!(
        "{}-{}-{}-{}-{}infoc",
        &u[0..8],
        &u[8..12],
        &u[12..16],
        &u[16..20],
        &u[20..]
    )
}

/// Bilibili Danmu Protocol Implementation
#[derive(Clone)]
pub struct BilibiliDanmuProtocol {
    client: Client,
    cookies: Option<String>,
    wbi: Arc<WbiSigner>,
    buvid3: String,
    uid: u64,
    room_id: u64,
    info: DanmuInfo,
    connection_cookies: Option<String>,
}

impl BilibiliDanmuProtocol {
    pub fn new(client: Client, cookies: Option<String>) -> Self {
        Self {
            client,
            cookies,
            wbi: Arc::new(WbiSigner::new()),
            buvid3: generate_fake_buvid3(),
            uid: 0,
            room_id: 0,
            info: DanmuInfo::default(),
            connection_cookies: None,
        }
    }

    /// Real (long) room id, known after `resolve`.
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    fn buvid(&self) -> String {
        self.connection_cookies
            .as_deref()
            .and_then(|c| cookie_value(c, "buvid3"))
            .unwrap_or_else(|| self.buvid3.clone())
    }

    fn auth_packet(&self) -> Result<Message> {
        let buvid = self.buvid();
        let body = AuthBody {
            uid: self.uid,
            roomid: self.room_id,
            protover: 3,
            buvid: &buvid,
            platform: "web",
            auth_type: 2,
            key: &self.info.token,
        };
        Ok(Message::Binary(encode_packet(
            &serde_json::to_vec(&body)?,
            op::AUTH,
        )))
    }
}

#[async_trait]
impl DanmuProtocol for BilibiliDanmuProtocol {
    type Event = BilibiliEvent;

    fn platform(&self) -> Platform {
        Platform::Bilibili
    }

    async fn resolve(&mut self, room_id: &str) -> Result<()> {
        if !Platform::Bilibili.validate_room_id(room_id) {
            return Err(DanmakuError::InvalidRoomId(room_id.to_string()));
        }
        let info = api::fetch_room_info(&self.client, room_id).await?;
        debug!(room_id, real_room_id = info.room_id, live_status = info.live_status, "Resolved bilibili room");
        self.room_id = info.room_id;
        Ok(())
    }

    async fn websocket_url(&mut self, _room_id: &str) -> Result<String> {
        self.info = api::fetch_danmu_info(
            &self.client,
            &self.wbi,
            self.room_id,
            self.connection_cookies.as_deref(),
        )
        .await?;
        Ok(self.info.url.clone())
    }

    fn headers(&self, _room_id: &str) -> Vec<(String, String)> {
        vec![
            ("User-Agent".to_string(), DEFAULT_UA.to_string()),
            ("Origin".to_string(), "https://live.bilibili.com".to_string()),
            ("Referer".to_string(), "https://live.bilibili.com".to_string()),
        ]
    }

    fn cookies(&self) -> Option<String> {
        let buvid = format!("buvid3={}", self.buvid3);
        crate::danmaku::merge_cookie_headers(Some(&buvid), self.cookies.as_deref())
    }

    /// Cookies authenticate the HTTP lookups, not the socket.
    fn send_cookie_header(&self) -> bool {
        false
    }

    fn configure_connection(&mut self, cookies: Option<&str>) {
        // A uid is only accepted together with a logged-in session.
        self.uid = cookies
            .filter(|c| cookie_value(c, "SESSDATA").is_some())
            .and_then(|c| cookie_value(c, "DedeUserID"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        self.connection_cookies = cookies.map(str::to_string);
    }

    fn handshake_messages(&self, _room_id: &str) -> Result<Vec<Message>> {
        Ok(vec![self.auth_packet()?])
    }

    fn heartbeat_message(&self) -> Option<Message> {
        Some(Message::Binary(encode_packet(HEARTBEAT_BODY, op::HEARTBEAT)))
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn decode_message(&mut self, message: &Message) -> Result<DecodedFrame<BilibiliEvent>> {
        let Message::Binary(data) = message else {
            return Ok(DecodedFrame::empty());
        };

        let mut events = Vec::new();
        for packet in decode_packets(data)? {
            match packet.operation {
                op::NOTIFICATION => match serde_json::from_slice::<Value>(&packet.body) {
                    Ok(json) => events.extend(BilibiliEvent::from_notification(json)),
                    Err(e) => debug!("Invalid notification body: {}", e),
                },
                op::AUTH_REPLY => debug!("Bilibili auth reply received"),
                op::HEARTBEAT_REPLY => trace!("Bilibili heartbeat reply"),
                other => trace!("Unknown operation: {}", other),
            }
        }
        Ok(DecodedFrame::events(events))
    }
}

pub type BilibiliDanmuProvider = WebSocketDanmuProvider<BilibiliDanmuProtocol>;

pub fn create_bilibili_danmu_provider(
    client: Client,
    cookies: Option<String>,
    config: Option<WebSocketProviderConfig>,
) -> BilibiliDanmuProvider {
    WebSocketDanmuProvider::with_protocol(BilibiliDanmuProtocol::new(client, cookies), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::default_client;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use rstest::rstest;
    use serde_json::json;
    use std::io::Write;

    fn protocol() -> BilibiliDanmuProtocol {
        BilibiliDanmuProtocol::new(default_client().unwrap(), None)
    }

    fn notification(value: &Value) -> Bytes {
        encode_packet(value.to_string().as_bytes(), op::NOTIFICATION)
    }

    #[test]
    fn test_heartbeat_packet_layout() {
        let Some(Message::Binary(packet)) = protocol().heartbeat_message() else {
            panic!("expected binary heartbeat");
        };
        assert_eq!(
            &packet[..16],
            &[0, 0, 0, 0x1f, 0, 0x10, 0, 1, 0, 0, 0, 2, 0, 0, 0, 1]
        );
        assert_eq!(&packet[16..], b"[object Object]");
    }

    #[test]
    fn test_auth_packet() {
        let mut protocol = protocol();
        protocol.room_id = 21452505;
        protocol.info.token = "tok".to_string();
        protocol.configure_connection(Some("buvid3=B3; DedeUserID=42"));

        let msgs = protocol.handshake_messages("1").unwrap();
        let Message::Binary(packet) = &msgs[0] else {
            panic!("expected binary auth");
        };
        let packets = decode_packets(packet).unwrap();
        assert_eq!(packets[0].operation, op::AUTH);
        let body: Value = serde_json::from_slice(&packets[0].body).unwrap();
        assert_eq!(body["roomid"], 21452505);
        assert_eq!(body["protover"], 3);
        assert_eq!(body["key"], "tok");
        assert_eq!(body["buvid"], "B3");
        // No SESSDATA, so the uid stays anonymous.
        assert_eq!(body["uid"], 0);
    }

    #[test]
    fn test_decode_compressed_batch() {
        let mut batch = notification(&json!({
            "cmd": "DANMU_MSG:4:0:2:2:2:0",
            "info": [[0, 1, 25, 16777215], "hello", [1001, "alice"]]
        }))
        .to_vec();
        batch.extend_from_slice(&notification(&json!({
            "cmd": "SEND_GIFT",
            "data": {"uid": 1002, "uname": "bob", "giftName": "辣条", "num": 3, "price": 100,
                     "face": "https://i0.hdslb.com/bob.jpg"}
        })));

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&batch).unwrap();
        let compressed = encoder.finish().unwrap();
        let mut frame = encode_packet(&compressed, op::NOTIFICATION).to_vec();
        BigEndian::write_u16(&mut frame[6..8], ver::ZLIB);

        let decoded = protocol()
            .decode_message(&Message::Binary(frame.into()))
            .unwrap();
        assert_eq!(decoded.events.len(), 2);
        match &decoded.events[0] {
            BilibiliEvent::Danmaku(d) => {
                assert_eq!(d.uid, 1001);
                assert_eq!(d.uname, "alice");
                assert_eq!(d.content, "hello");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &decoded.events[1] {
            BilibiliEvent::Gift(g) => {
                assert_eq!(g.gift_name, "辣条");
                assert_eq!((g.num, g.price), (3, 100));
                assert_eq!(g.face, "https://i0.hdslb.com/bob.jpg");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_notification_dispatch() {
        let guard = BilibiliEvent::from_notification(json!({
            "cmd": "GUARD_BUY",
            "data": {"uid": 7, "username": "carol", "guard_level": 3, "price": 198000}
        }));
        assert!(matches!(guard, Some(BilibiliEvent::GuardBuy(g)) if g.guard_level == 3 && g.price == 198000));

        let sc = BilibiliEvent::from_notification(json!({
            "cmd": "SUPER_CHAT_MESSAGE",
            "data": {"uid": 8, "message": "hi", "price": 30,
                     "user_info": {"uname": "dave", "face": "https://f/d.jpg"}}
        }));
        assert!(matches!(sc, Some(BilibiliEvent::SuperChat(s)) if s.uname == "dave" && s.price == 30.0));

        let like = BilibiliEvent::from_notification(json!({
            "cmd": "LIKE_INFO_V3_CLICK", "data": {"uid": 9, "uname": "erin"}
        }));
        assert!(matches!(like, Some(BilibiliEvent::Like(u)) if u.uname == "erin"));

        let enter = BilibiliEvent::from_notification(json!({
            "cmd": "INTERACT_WORD", "data": {"uid": 10, "uname": "frank"}
        }));
        assert!(matches!(enter, Some(BilibiliEvent::Interact(u)) if u.uid == 10));

        let end = BilibiliEvent::from_notification(json!({"cmd": "PREPARING", "roomid": "1"}));
        assert!(matches!(end, Some(BilibiliEvent::Preparing(_))));

        assert!(BilibiliEvent::from_notification(json!({"cmd": "ONLINE_RANK_COUNT"})).is_none());
    }

    #[test]
    fn test_truncated_packet_is_error() {
        let packet = notification(&json!({"cmd": "PREPARING"}));
        assert!(decode_packets(&packet[..packet.len() - 2]).is_err());
    }

    #[test]
    fn test_regex_extraction() {
        let raw = r#"{"info":[[0,1,25,{"emoticon":{"url":"http://i0.hdslb.com/emote.png","width":20}}],"x",{"face":"https://i0.hdslb.com/face.jpg"}]}"#;
        assert_eq!(
            extract_face_url(raw).as_deref(),
            Some("https://i0.hdslb.com/face.jpg")
        );
        assert_eq!(
            extract_emoticon_urls(raw),
            vec!["http://i0.hdslb.com/emote.png"]
        );

        let escaped = r#"{"extra":"{\"url\":\"https://i0.hdslb.com/e2.png\",\"width\":60}"}"#;
        assert_eq!(
            extract_emoticon_urls(escaped),
            vec!["https://i0.hdslb.com/e2.png"]
        );
        assert_eq!(extract_face_url("{}"), None);
    }

    #[rstest]
    #[case(3, "舰长")]
    #[case(2, "提督")]
    #[case(1, "总督")]
    #[case(0, "未知等级")]
    fn test_guard_level_name(#[case] level: u64, #[case] name: &str) {
        assert_eq!(guard_level_name(level), name);
    }

    #[test]
    fn test_fake_buvid3_shape() {
        let buvid = generate_fake_buvid3();
        assert!(buvid.ends_with("infoc"));
        assert_eq!(buvid.len(), 36 + 5);
        assert_eq!(buvid.matches('-').count(), 4);
    }
}
