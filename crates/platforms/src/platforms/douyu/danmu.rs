//! Douyu (斗鱼) danmu protocol.
//!
//! Native STT over `wss://danmuproxy.douyu.com:8502/`: log in, join the
//! all-messages group and keep the session alive with `mrkl`.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace};

use crate::Platform;
use crate::danmaku::websocket::{DanmuProtocol, DecodedFrame, WebSocketDanmuProvider};
use crate::danmaku::{DanmakuError, Result, WebSocketProviderConfig};
use crate::http::DEFAULT_UA;

use super::stt::{self, SttRecord};

const DOUYU_WS_URL: &str = "wss://danmuproxy.douyu.com:8502/";

/// Douyu requires a heartbeat every 45 seconds.
const HEARTBEAT_INTERVAL_SECS: u64 = 45;

/// Group that receives every danmu of the room.
const ALL_MESSAGES_GROUP: &str = "-9999";

const AVATAR_BASE_URL: &str = "https://apic.douyucdn.cn/upload/";

/// Build the avatar URL for an `ic` path.
pub fn avatar_url(ic: &str) -> String {
    if ic.is_empty() {
        return String::new();
    }
    format!("{AVATAR_BASE_URL}{ic}_big.jpg")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DouyuChat {
    pub uid: String,
    pub nickname: String,
    pub content: String,
    /// Avatar path (`ic`).
    pub avatar: String,
    pub level: u32,
    pub raw: SttRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DouyuGift {
    pub uid: String,
    pub nickname: String,
    pub gift_id: String,
    pub count: u32,
    pub hits: u32,
    /// Contribution (`dc`) carried by the gift.
    pub contribution: u64,
    pub avatar: String,
    pub raw: SttRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DouyuUserEnter {
    pub uid: String,
    pub nickname: String,
    pub avatar: String,
    pub raw: SttRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DouyuLiveStatus {
    /// `ss == 1` while live, `2` once the stream stopped.
    pub live: bool,
    pub raw: SttRecord,
}

/// Events emitted by the Douyu protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DouyuEvent {
    Chat(DouyuChat),
    Gift(DouyuGift),
    UserEnter(DouyuUserEnter),
    LiveStatus(DouyuLiveStatus),
}

fn field(record: &SttRecord, key: &str) -> String {
    record.get(key).cloned().unwrap_or_default()
}

fn number<T: std::str::FromStr + Default>(record: &SttRecord, key: &str) -> T {
    record
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

impl DouyuEvent {
    /// Map one STT record to an event. Records we do not forward yield `None`.
    pub fn from_record(record: SttRecord) -> Option<Self> {
        let kind = record.get("type")?.clone();
        let event = match kind.as_str() {
            "chatmsg" => Self::Chat(DouyuChat {
                uid: field(&record, "uid"),
                nickname: field(&record, "nn"),
                content: field(&record, "txt"),
                avatar: field(&record, "ic"),
                level: number(&record, "level"),
                raw: record,
            }),
            "dgb" => Self::Gift(DouyuGift {
                uid: field(&record, "uid"),
                nickname: field(&record, "nn"),
                gift_id: field(&record, "gfid"),
                count: number::<u32>(&record, "gfcnt").max(1),
                hits: number::<u32>(&record, "hits").max(1),
                contribution: number(&record, "dc"),
                avatar: field(&record, "ic"),
                raw: record,
            }),
            "uenter" => Self::UserEnter(DouyuUserEnter {
                uid: field(&record, "uid"),
                nickname: field(&record, "nn"),
                avatar: field(&record, "ic"),
                raw: record,
            }),
            "rss" => Self::LiveStatus(DouyuLiveStatus {
                live: number::<u32>(&record, "ss") == 1,
                raw: record,
            }),
            "loginres" => {
                debug!("Douyu login response received");
                return None;
            }
            other => {
                trace!("Ignored douyu message type: {}", other);
                return None;
            }
        };
        Some(event)
    }
}

/// Douyu Danmu Protocol Implementation
#[derive(Clone, Default)]
pub struct DouyuDanmuProtocol {
    cookies: Option<String>,
}

impl DouyuDanmuProtocol {
    pub fn new(cookies: Option<String>) -> Self {
        Self { cookies }
    }

    fn login_packet(room_id: &str) -> Message {
        let payload = stt::encode(&[("type", "loginreq"), ("roomid", room_id)]);
        Message::Binary(stt::encode_packet(&payload))
    }

    fn join_group_packet(room_id: &str) -> Message {
        let payload = stt::encode(&[
            ("type", "joingroup"),
            ("rid", room_id),
            ("gid", ALL_MESSAGES_GROUP),
        ]);
        Message::Binary(stt::encode_packet(&payload))
    }
}

#[async_trait]
impl DanmuProtocol for DouyuDanmuProtocol {
    type Event = DouyuEvent;

    fn platform(&self) -> Platform {
        Platform::Douyu
    }

    async fn resolve(&mut self, room_id: &str) -> Result<()> {
        if !Platform::Douyu.validate_room_id(room_id) {
            return Err(DanmakuError::InvalidRoomId(room_id.to_string()));
        }
        Ok(())
    }

    async fn websocket_url(&mut self, _room_id: &str) -> Result<String> {
        Ok(DOUYU_WS_URL.to_string())
    }

    fn headers(&self, _room_id: &str) -> Vec<(String, String)> {
        vec![
            ("Origin".to_string(), "https://www.douyu.com".to_string()),
            ("Referer".to_string(), "https://www.douyu.com".to_string()),
            ("User-Agent".to_string(), DEFAULT_UA.to_string()),
        ]
    }

    fn cookies(&self) -> Option<String> {
        self.cookies.clone()
    }

    fn handshake_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        Ok(vec![
            Self::login_packet(room_id),
            Self::join_group_packet(room_id),
        ])
    }

    fn heartbeat_message(&self) -> Option<Message> {
        Some(Message::Binary(stt::encode_packet("type@=mrkl/")))
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn decode_message(&mut self, message: &Message) -> Result<DecodedFrame<DouyuEvent>> {
        let Message::Binary(data) = message else {
            return Ok(DecodedFrame::empty());
        };

        let events = stt::decode_packets(data)?
            .iter()
            .map(|payload| stt::decode(payload))
            .filter_map(DouyuEvent::from_record)
            .collect();
        Ok(DecodedFrame::events(events))
    }
}

pub type DouyuDanmuProvider = WebSocketDanmuProvider<DouyuDanmuProtocol>;

pub fn create_douyu_danmu_provider(
    cookies: Option<String>,
    config: Option<WebSocketProviderConfig>,
) -> DouyuDanmuProvider {
    WebSocketDanmuProvider::with_protocol(DouyuDanmuProtocol::new(cookies), config)
}
