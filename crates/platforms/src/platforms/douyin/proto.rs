//! Webcast IM protobuf messages.
//!
//! Only the fields the decoder reads are declared; prost skips the rest.

use serde::{Serialize, Serializer};

/// Ids are 64-bit; keep them exact for JSON consumers.
fn as_string<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HeadersEntry {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushFrame {
    #[prost(uint64, tag = "1")]
    pub seq_id: u64,
    #[prost(uint64, tag = "2")]
    pub log_id: u64,
    #[prost(uint64, tag = "3")]
    pub service: u64,
    #[prost(uint64, tag = "4")]
    pub method: u64,
    #[prost(message, repeated, tag = "5")]
    pub headers: Vec<HeadersEntry>,
    #[prost(string, tag = "6")]
    pub payload_encoding: String,
    #[prost(string, tag = "7")]
    pub payload_type: String,
    #[prost(bytes = "vec", tag = "8")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Message>,
    #[prost(string, tag = "2")]
    pub cursor: String,
    #[prost(uint64, tag = "3")]
    pub fetch_interval: u64,
    #[prost(uint64, tag = "4")]
    pub now: u64,
    #[prost(string, tag = "5")]
    pub internal_ext: String,
    #[prost(uint32, tag = "6")]
    pub fetch_type: u32,
    #[prost(uint64, tag = "8")]
    pub heartbeat_duration: u64,
    #[prost(bool, tag = "9")]
    pub need_ack: bool,
    #[prost(string, tag = "10")]
    pub push_server: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub msg_id: i64,
    #[prost(int32, tag = "4")]
    pub msg_type: i32,
    #[prost(int64, tag = "5")]
    pub offset: i64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct Image {
    #[prost(string, repeated, tag = "1")]
    pub url_list: Vec<String>,
    #[prost(string, tag = "2")]
    pub uri: String,
}

impl Image {
    pub fn first_url(&self) -> &str {
        self.url_list.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct User {
    #[prost(uint64, tag = "1")]
    #[serde(serialize_with = "as_string")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub short_id: u64,
    #[prost(string, tag = "3")]
    pub nick_name: String,
    #[prost(message, optional, tag = "9")]
    pub avatar_thumb: Option<Image>,
    #[prost(string, tag = "38")]
    pub display_id: String,
}

impl User {
    pub fn avatar(&self) -> &str {
        self.avatar_thumb
            .as_ref()
            .map(Image::first_url)
            .unwrap_or_default()
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct TextPieceUser {
    #[prost(message, optional, tag = "1")]
    pub user: Option<User>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct TextPieceImage {
    #[prost(message, optional, tag = "1")]
    pub image: Option<Image>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct TextPiece {
    #[prost(string, tag = "11")]
    pub string_value: String,
    #[prost(message, optional, tag = "21")]
    pub user_value: Option<TextPieceUser>,
    #[prost(message, optional, tag = "25")]
    pub image_value: Option<TextPieceImage>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct Text {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub default_pattern: String,
    #[prost(message, repeated, tag = "4")]
    pub pieces: Vec<TextPiece>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct Common {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(uint64, tag = "2")]
    #[serde(serialize_with = "as_string")]
    pub msg_id: u64,
    #[prost(uint64, tag = "3")]
    #[serde(serialize_with = "as_string")]
    pub room_id: u64,
    #[prost(uint64, tag = "4")]
    pub create_time: u64,
    #[prost(string, tag = "7")]
    pub describe: String,
    #[prost(message, optional, tag = "8")]
    pub display_text: Option<Text>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct ChatMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(string, tag = "3")]
    pub content: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct EmojiChatMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(int64, tag = "3")]
    pub emoji_id: i64,
    #[prost(message, optional, tag = "4")]
    pub emoji_content: Option<Text>,
    #[prost(string, tag = "5")]
    pub default_content: String,
}

impl EmojiChatMessage {
    /// Image URLs embedded in the emoji content.
    pub fn image_urls(&self) -> Vec<String> {
        self.emoji_content
            .iter()
            .flat_map(|text| text.pieces.iter())
            .filter_map(|piece| piece.image_value.as_ref()?.image.as_ref())
            .map(|image| image.first_url().to_string())
            .filter(|url| !url.is_empty())
            .collect()
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct GiftStruct {
    #[prost(message, optional, tag = "1")]
    pub image: Option<Image>,
    #[prost(string, tag = "2")]
    pub describe: String,
    #[prost(uint64, tag = "5")]
    pub id: u64,
    #[prost(bool, tag = "10")]
    pub combo: bool,
    #[prost(uint32, tag = "11")]
    pub r#type: u32,
    #[prost(uint32, tag = "12")]
    pub diamond_count: u32,
    #[prost(string, tag = "16")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct GiftMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(uint64, tag = "2")]
    pub gift_id: u64,
    #[prost(uint64, tag = "3")]
    pub fan_ticket_count: u64,
    #[prost(uint64, tag = "4")]
    pub group_count: u64,
    #[prost(uint64, tag = "5")]
    pub repeat_count: u64,
    #[prost(uint64, tag = "6")]
    pub combo_count: u64,
    #[prost(message, optional, tag = "7")]
    pub user: Option<User>,
    #[prost(message, optional, tag = "8")]
    pub to_user: Option<User>,
    #[prost(uint32, tag = "9")]
    pub repeat_end: u32,
    #[prost(message, optional, tag = "15")]
    pub gift: Option<GiftStruct>,
}

impl GiftMessage {
    /// A combo gift repeats until a final message with `repeat_end == 1`.
    pub fn is_terminal(&self) -> bool {
        let combo = self.gift.as_ref().is_some_and(|g| g.combo);
        !combo || self.repeat_end == 1
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct LikeMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(uint64, tag = "2")]
    pub count: u64,
    #[prost(uint64, tag = "3")]
    pub total: u64,
    #[prost(message, optional, tag = "5")]
    pub user: Option<User>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct MemberMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(uint64, tag = "3")]
    pub member_count: u64,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct ControlMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(int32, tag = "2")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct RoomMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(string, tag = "2")]
    pub content: String,
}
