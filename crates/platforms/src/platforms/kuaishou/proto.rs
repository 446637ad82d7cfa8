//! Kuaishou web live socket messages.

use serde::Serialize;

pub mod payload_type {
    pub const CS_HEARTBEAT: i32 = 1;
    pub const SC_HEARTBEAT_ACK: i32 = 101;
    pub const CS_ENTER_ROOM: i32 = 200;
    pub const SC_ENTER_ROOM_ACK: i32 = 300;
    pub const SC_FEED_PUSH: i32 = 310;
    pub const SC_LIVE_CHAT_ENDED: i32 = 325;
}

pub mod compression_type {
    pub const GZIP: i32 = 2;
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SocketMessage {
    #[prost(int32, tag = "1")]
    pub payload_type: i32,
    #[prost(int32, tag = "2")]
    pub compression_type: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsWebEnterRoom {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub live_stream_id: String,
    #[prost(string, tag = "8")]
    pub kpn: String,
    #[prost(string, tag = "9")]
    pub kpf: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleUserInfo {
    #[prost(string, tag = "1")]
    pub principal_id: String,
    #[prost(string, tag = "2")]
    pub user_name: String,
    #[prost(string, tag = "3")]
    pub head_url: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebCommentFeed {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub user: Option<SimpleUserInfo>,
    #[prost(string, tag = "3")]
    pub content: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebLikeFeed {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub user: Option<SimpleUserInfo>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebGiftFeed {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub user: Option<SimpleUserInfo>,
    #[prost(uint64, tag = "3")]
    pub time: u64,
    #[prost(uint32, tag = "4")]
    pub gift_id: u32,
    #[prost(string, tag = "6")]
    pub merge_key: String,
    #[prost(uint32, tag = "7")]
    pub batch_size: u32,
    #[prost(uint32, tag = "8")]
    pub combo_count: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ScWebFeedPush {
    #[prost(string, tag = "1")]
    pub display_watching_count: String,
    #[prost(string, tag = "2")]
    pub display_like_count: String,
    #[prost(message, repeated, tag = "5")]
    pub comment_feeds: Vec<WebCommentFeed>,
    #[prost(message, repeated, tag = "8")]
    pub like_feeds: Vec<WebLikeFeed>,
    #[prost(message, repeated, tag = "9")]
    pub gift_feeds: Vec<WebGiftFeed>,
}
