//! Douyin (抖音) danmu protocol.
//!
//! The push service speaks protobuf: every binary frame is a `PushFrame`
//! whose payload is a (usually gzip compressed) `Response` carrying a batch of
//! typed `Message`s.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use prost::Message as ProstMessage;
use rand::seq::IndexedRandom;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::io::Read;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace};

use crate::Platform;
use crate::danmaku::websocket::{
    DanmuProtocol, DecodedFrame, WebSocketDanmuProvider, cookie_value,
};
use crate::danmaku::{DanmakuError, Result, SignatureProvider, WebSocketProviderConfig};
use crate::http::DEFAULT_UA;

use super::api::{self, LIVE_DOUYIN_URL, RoomIds};
use super::proto;
use super::signature::XBogusSigner;

const DOUYIN_WS_HOSTS: &[&str] = &[
    "wss://webcast100-ws-web-lq.douyin.com",
    "wss://webcast100-ws-web-hl.douyin.com",
    "wss://webcast100-ws-web-lf.douyin.com",
];
const DOUYIN_WS_URL_PATH: &str = "/webcast/im/push/v2/";

const VERSION_CODE: &str = "180800";
const WEBCAST_SDK_VERSION: &str = "1.0.14-beta.0";

const HEARTBEAT: &[u8] = b":\x02hb";
const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// `ControlMessage.status` once the broadcast is over.
pub const CONTROL_STATUS_ENDED: i32 = 3;

static GIFT_COUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s(\d+)\s*个").unwrap());
static PERIOD_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"月度|季度|年度").unwrap());

/// Events emitted by the Douyin protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DouyinEvent {
    Chat(proto::ChatMessage),
    EmojiChat(proto::EmojiChatMessage),
    Gift(proto::GiftMessage),
    Like(proto::LikeMessage),
    Member(proto::MemberMessage),
    Room(proto::RoomMessage),
    Control(proto::ControlMessage),
}

/// A membership purchase announced in a room message.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub user: proto::User,
    /// `月度`, `季度` or `年度`.
    pub period: String,
}

impl proto::GiftMessage {
    /// Aggregate gift count: the repeat count, else the `N个` in the description.
    pub fn count(&self) -> u64 {
        if self.repeat_count > 0 {
            return self.repeat_count;
        }
        let describe = [
            self.common.as_ref().map(|c| c.describe.as_str()),
            self.gift.as_ref().map(|g| g.describe.as_str()),
        ];
        describe
            .into_iter()
            .flatten()
            .find_map(|text| GIFT_COUNT_REGEX.captures(text)?.get(1)?.as_str().parse().ok())
            .unwrap_or(1)
    }
}

impl proto::RoomMessage {
    /// Membership purchase carried by this message, if any.
    pub fn subscription(&self) -> Option<Subscription> {
        let text = self.common.as_ref().and_then(|c| c.display_text.as_ref());
        let pieces = text.map(|t| t.pieces.as_slice()).unwrap_or_default();

        let mut all = self.content.clone();
        if let Some(text) = text {
            all.push_str(&text.default_pattern);
        }
        for piece in pieces {
            all.push_str(&piece.string_value);
        }
        if !all.contains("开通") || !all.contains("会员") {
            return None;
        }

        let user = pieces
            .iter()
            .find_map(|p| p.user_value.as_ref()?.user.clone())?;
        let period = PERIOD_REGEX.find(&all)?.as_str().to_string();
        Some(Subscription { user, period })
    }
}

/// Douyin Protocol Implementation
#[derive(Clone)]
pub struct DouyinDanmuProtocol {
    client: Client,
    cookies: Option<String>,
    signer: Arc<dyn SignatureProvider>,
    ttwid: Option<String>,
    ids: Option<RoomIds>,
}

impl DouyinDanmuProtocol {
    pub fn new(client: Client, cookies: Option<String>) -> Self {
        Self {
            client,
            cookies,
            signer: Arc::new(XBogusSigner),
            ttwid: None,
            ids: None,
        }
    }

    /// Replace the URL signer.
    pub fn with_signer(mut self, signer: Arc<dyn SignatureProvider>) -> Self {
        self.signer = signer;
        self
    }

    /// Input the URL signature is computed over.
    fn signature_input(ids: &RoomIds) -> String {
        format!(
            "live_id=1,aid=6383,version_code={VERSION_CODE},webcast_sdk_version={WEBCAST_SDK_VERSION},room_id={},sub_room_id=,sub_channel_id=,did_rule=3,user_unique_id={},device_platform=web,device_type=,ac=,identity=audience",
            ids.room_id, ids.user_unique_id
        )
    }

    fn query_params(ids: &RoomIds) -> Vec<(&'static str, String)> {
        let browser_version = DEFAULT_UA
            .strip_prefix("Mozilla/")
            .unwrap_or(DEFAULT_UA)
            .to_string();
        [
            ("app_name", "douyin_web"),
            ("version_code", VERSION_CODE),
            ("webcast_sdk_version", WEBCAST_SDK_VERSION),
            ("update_version_code", WEBCAST_SDK_VERSION),
            ("compress", "gzip"),
            ("device_platform", "web"),
            ("cookie_enabled", "true"),
            ("screen_width", "1920"),
            ("screen_height", "1080"),
            ("browser_language", "zh-CN"),
            ("browser_platform", "Win32"),
            ("browser_name", "Mozilla"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .chain([
            ("browser_version", browser_version),
            ("browser_online", "true".to_string()),
            ("tz_name", "Asia/Shanghai".to_string()),
            ("host", "https://live.douyin.com".to_string()),
            ("aid", "6383".to_string()),
            ("live_id", "1".to_string()),
            ("did_rule", "3".to_string()),
            ("endpoint", "live_pc".to_string()),
            ("support_wrds", "1".to_string()),
            ("user_unique_id", ids.user_unique_id.clone()),
            ("im_path", "/webcast/im/fetch/".to_string()),
            ("identity", "audience".to_string()),
            ("need_persist_msg_count", "15".to_string()),
            ("room_id", ids.room_id.clone()),
            ("heartbeatDuration", "0".to_string()),
        ])
        .collect()
    }

    fn build_websocket_url(host: &str, ids: &RoomIds, signature: &str) -> String {
        let query = Self::query_params(ids)
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!(
            "{host}{DOUYIN_WS_URL_PATH}?{query}&signature={}",
            urlencoding::encode(signature)
        )
    }

    fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| DanmakuError::protocol(format!("Failed to decompress gzip: {e}")))?;
        Ok(decompressed)
    }

    fn ack_packet(log_id: u64, internal_ext: &str) -> Message {
        let frame = proto::PushFrame {
            log_id,
            payload_type: "ack".to_string(),
            payload: internal_ext.as_bytes().to_vec(),
            ..Default::default()
        };
        Message::Binary(Bytes::from(frame.encode_to_vec()))
    }

    /// Decode a `PushFrame` and its `Response`. Non-`msg` frames yield `None`.
    fn decode_push_frame(data: &[u8]) -> Result<Option<(proto::Response, u64)>> {
        let frame = proto::PushFrame::decode(data)?;
        if !frame.payload_type.is_empty() && frame.payload_type != "msg" {
            trace!("Skipping douyin {} frame", frame.payload_type);
            return Ok(None);
        }

        let compress_type = frame
            .headers
            .iter()
            .find(|h| h.key == "compress_type")
            .map(|h| h.value.as_str())
            .unwrap_or("gzip");
        let response = if compress_type == "gzip" {
            proto::Response::decode(Self::decompress_gzip(&frame.payload)?.as_slice())?
        } else {
            proto::Response::decode(frame.payload.as_slice())?
        };
        Ok(Some((response, frame.log_id)))
    }

    fn parse_message(message: &proto::Message) -> Result<Option<DouyinEvent>> {
        let payload = message.payload.as_slice();
        let event = match message.method.as_str() {
            "WebcastChatMessage" => DouyinEvent::Chat(proto::ChatMessage::decode(payload)?),
            "WebcastEmojiChatMessage" => {
                DouyinEvent::EmojiChat(proto::EmojiChatMessage::decode(payload)?)
            }
            "WebcastGiftMessage" => DouyinEvent::Gift(proto::GiftMessage::decode(payload)?),
            "WebcastLikeMessage" => DouyinEvent::Like(proto::LikeMessage::decode(payload)?),
            "WebcastMemberMessage" => DouyinEvent::Member(proto::MemberMessage::decode(payload)?),
            "WebcastRoomMessage" => DouyinEvent::Room(proto::RoomMessage::decode(payload)?),
            "WebcastControlMessage" => {
                DouyinEvent::Control(proto::ControlMessage::decode(payload)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[async_trait]
impl DanmuProtocol for DouyinDanmuProtocol {
    type Event = DouyinEvent;

    fn platform(&self) -> Platform {
        Platform::Douyin
    }

    async fn resolve(&mut self, room_id: &str) -> Result<()> {
        if !Platform::Douyin.validate_room_id(room_id) {
            return Err(DanmakuError::InvalidRoomId(room_id.to_string()));
        }

        let ttwid = match self
            .cookies
            .as_deref()
            .and_then(|c| cookie_value(c, "ttwid"))
        {
            Some(ttwid) => ttwid,
            None => api::fetch_ttwid(&self.client).await?,
        };
        let ids = api::fetch_room_ids(&self.client, room_id, &ttwid).await?;
        self.ttwid = Some(ttwid);
        self.ids = Some(ids);
        Ok(())
    }

    async fn websocket_url(&mut self, room_id: &str) -> Result<String> {
        let ids = self
            .ids
            .as_ref()
            .ok_or_else(|| DanmakuError::protocol(format!("room {room_id} not resolved")))?;
        let signature = self
            .signer
            .compute_signature(&Self::signature_input(ids))
            .await?;

        let host = DOUYIN_WS_HOSTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(DOUYIN_WS_HOSTS[0]);
        Ok(Self::build_websocket_url(host, ids, &signature))
    }

    fn headers(&self, _room_id: &str) -> Vec<(String, String)> {
        vec![
            ("Origin".to_string(), "https://live.douyin.com".to_string()),
            ("Referer".to_string(), LIVE_DOUYIN_URL.to_string()),
            ("User-Agent".to_string(), DEFAULT_UA.to_string()),
        ]
    }

    fn cookies(&self) -> Option<String> {
        let ttwid = self.ttwid.as_ref().map(|t| format!("ttwid={t}"));
        crate::danmaku::merge_cookie_headers(ttwid.as_deref(), self.cookies.as_deref())
    }

    fn heartbeat_message(&self) -> Option<Message> {
        Some(Message::Binary(Bytes::from_static(HEARTBEAT)))
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn decode_message(&mut self, message: &Message) -> Result<DecodedFrame<DouyinEvent>> {
        let data = match message {
            Message::Binary(data) => data,
            Message::Text(text) => {
                debug!("Received text message: {}", text);
                return Ok(DecodedFrame::empty());
            }
            _ => return Ok(DecodedFrame::empty()),
        };

        let Some((response, log_id)) = Self::decode_push_frame(data)? else {
            return Ok(DecodedFrame::empty());
        };

        let mut ended = false;
        let mut events = Vec::with_capacity(response.messages.len());
        for message in &response.messages {
            match Self::parse_message(message) {
                Ok(Some(event)) => {
                    if let DouyinEvent::Control(control) = &event {
                        ended |= control.status == CONTROL_STATUS_ENDED;
                    }
                    events.push(event);
                }
                Ok(None) => trace!("Ignored douyin message: {}", message.method),
                Err(e) => debug!("Failed to decode {}: {}", message.method, e),
            }
        }

        let mut frame = DecodedFrame::events(events);
        if response.need_ack {
            frame = frame.with_reply(Self::ack_packet(log_id, &response.internal_ext));
        }
        if ended {
            frame = frame.finish();
        }
        Ok(frame)
    }
}

pub type DouyinDanmuProvider = WebSocketDanmuProvider<DouyinDanmuProtocol>;

pub fn create_douyin_danmu_provider(
    client: Client,
    cookies: Option<String>,
    config: Option<WebSocketProviderConfig>,
) -> DouyinDanmuProvider {
    WebSocketDanmuProvider::with_protocol(DouyinDanmuProtocol::new(client, cookies), config)
}
