//! The platform-agnostic message published to subscribers.
//!
//! Wire form:
//!
//! ```json
//! { "rid": "123", "platform": "bilibili", "type": "Chat",
//!   "data": { "name": "...", "avatar": "...", "content": "...", "emoticon": [], "raw": {} } }
//! ```

use danmu_platforms::Platform;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::{Error, Result};

/// Kind of a [`UnifiedMessage`], the `type` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum MessageType {
    Chat,
    Gift,
    Subscribe,
    SuperChat,
    Like,
    EnterRoom,
    EndLive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatData {
    pub name: String,
    pub avatar: String,
    pub content: String,
    #[serde(default)]
    pub emoticon: Vec<String>,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GiftData {
    pub name: String,
    pub avatar: String,
    pub item: String,
    pub num: u64,
    pub price: f64,
    #[serde(rename = "giftIcon", default)]
    pub gift_icon: String,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeData {
    pub name: String,
    pub avatar: String,
    pub item: String,
    pub num: u64,
    pub price: f64,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuperChatData {
    pub name: String,
    pub avatar: String,
    pub content: String,
    pub price: f64,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LikeData {
    pub name: String,
    pub avatar: String,
    pub count: u64,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnterRoomData {
    pub name: String,
    pub avatar: String,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndLiveData {
    #[serde(default)]
    pub raw: Value,
}

/// Payload of a [`UnifiedMessage`]. Serializes as the bare variant body; the
/// discriminant lives in the message's `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageData {
    Chat(ChatData),
    Gift(GiftData),
    Subscribe(SubscribeData),
    SuperChat(SuperChatData),
    Like(LikeData),
    EnterRoom(EnterRoomData),
    EndLive(EndLiveData),
}

impl MessageData {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Chat(_) => MessageType::Chat,
            Self::Gift(_) => MessageType::Gift,
            Self::Subscribe(_) => MessageType::Subscribe,
            Self::SuperChat(_) => MessageType::SuperChat,
            Self::Like(_) => MessageType::Like,
            Self::EnterRoom(_) => MessageType::EnterRoom,
            Self::EndLive(_) => MessageType::EndLive,
        }
    }

    /// Decode an untyped `data` object as the variant for `kind`.
    pub fn from_value(kind: MessageType, value: Value) -> Result<Self> {
        Ok(match kind {
            MessageType::Chat => Self::Chat(serde_json::from_value(value)?),
            MessageType::Gift => Self::Gift(serde_json::from_value(value)?),
            MessageType::Subscribe => Self::Subscribe(serde_json::from_value(value)?),
            MessageType::SuperChat => Self::SuperChat(serde_json::from_value(value)?),
            MessageType::Like => Self::Like(serde_json::from_value(value)?),
            MessageType::EnterRoom => Self::EnterRoom(serde_json::from_value(value)?),
            MessageType::EndLive => Self::EndLive(serde_json::from_value(value)?),
        })
    }
}

/// One normalized chat event.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedMessage {
    pub room_id: String,
    pub platform: Platform,
    pub data: MessageData,
}

impl UnifiedMessage {
    pub fn new(platform: Platform, room_id: impl Into<String>, data: MessageData) -> Self {
        Self {
            room_id: room_id.into(),
            platform,
            data,
        }
    }

    /// Build a message from untyped names, rejecting unknown platforms and
    /// types, and a `data` variant that does not match `kind`.
    pub fn try_new(
        room_id: impl Into<String>,
        platform: &str,
        kind: &str,
        data: MessageData,
    ) -> Result<Self> {
        let platform: Platform = platform
            .parse()
            .map_err(|_| Error::validation(format!("invalid platform: {platform}")))?;
        let kind: MessageType = kind
            .parse()
            .map_err(|_| Error::validation(format!("invalid message type: {kind}")))?;
        if data.message_type() != kind {
            return Err(Error::validation(format!(
                "message type {kind} does not match {} data",
                data.message_type()
            )));
        }
        Ok(Self::new(platform, room_id, data))
    }

    pub fn message_type(&self) -> MessageType {
        self.data.message_type()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize)]
struct WireRef<'a> {
    rid: &'a str,
    platform: Platform,
    #[serde(rename = "type")]
    kind: MessageType,
    data: &'a MessageData,
}

#[derive(Deserialize)]
struct Wire {
    rid: String,
    platform: String,
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

impl Serialize for UnifiedMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireRef {
            rid: &self.room_id,
            platform: self.platform,
            kind: self.message_type(),
            data: &self.data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UnifiedMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = Wire::deserialize(deserializer)?;
        let kind: MessageType = wire
            .kind
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid message type: {}", wire.kind)))?;
        let data = MessageData::from_value(kind, wire.data).map_err(D::Error::custom)?;
        Self::try_new(wire.rid, &wire.platform, &wire.kind, data).map_err(D::Error::custom)
    }
}

/// Embed a decoded platform event as `raw`.
pub fn raw_value<T: Serialize>(event: &T) -> Value {
    serde_json::to_value(event).unwrap_or_else(|e| {
        debug!(error = %e, "Failed to embed raw event");
        Value::Null
    })
}

/// Embed a raw string: JSON text is embedded as JSON, anything else as a string.
pub fn raw_from_str(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
