//! Kuaishou (快手) danmu protocol.
//!
//! Frames are protobuf `SocketMessage`s. The client announces itself with an
//! enter-room frame carrying the share-page token, then the server pushes
//! `SC_FEED_PUSH` batches until the live ends.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use prost::Message as ProstMessage;
use reqwest::Client;
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace};

use crate::Platform;
use crate::danmaku::websocket::{DanmuProtocol, DecodedFrame, WebSocketDanmuProvider};
use crate::danmaku::{DanmakuError, Result, WebSocketProviderConfig};
use crate::http::MOBILE_UA;

use super::api::{self, LiveSession};
use super::proto::{self, compression_type, payload_type};

/// `CS_HEARTBEAT` frame with a fixed client timestamp.
const HEARTBEAT: &[u8] = &[
    0x08, 0x01, 0x1A, 0x07, 0x08, 0xE7, 0xB5, 0xBA, 0xC7, 0xE8, 0x31,
];
const HEARTBEAT_INTERVAL_SECS: u64 = 20;

const ENTER_ROOM_KPN: &str = "KUAISHOU_H5";
const ENTER_ROOM_KPF: &str = "OUTSIDE_IOS_H5";

/// Events emitted by the Kuaishou protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum KuaishouEvent {
    Comment(proto::WebCommentFeed),
    Like(proto::WebLikeFeed),
    Gift(proto::WebGiftFeed),
    LiveEnded,
}

impl KuaishouEvent {
    pub fn user(&self) -> Option<&proto::SimpleUserInfo> {
        match self {
            KuaishouEvent::Comment(feed) => feed.user.as_ref(),
            KuaishouEvent::Like(feed) => feed.user.as_ref(),
            KuaishouEvent::Gift(feed) => feed.user.as_ref(),
            KuaishouEvent::LiveEnded => None,
        }
    }
}

pub struct KuaishouDanmuProtocol {
    client: Client,
    cookies: Option<String>,
    live_url: String,
    eid: String,
    session: Option<LiveSession>,
    /// The session fetched during `resolve` has not been used by a connection yet.
    fresh_session: bool,
}

impl KuaishouDanmuProtocol {
    pub fn new(client: Client, cookies: Option<String>) -> Self {
        Self {
            client,
            cookies,
            live_url: String::new(),
            eid: String::new(),
            session: None,
            fresh_session: false,
        }
    }

    fn enter_room_frame(session: &LiveSession) -> Message {
        let enter = proto::CsWebEnterRoom {
            token: session.token.clone(),
            live_stream_id: session.live_stream_id.clone(),
            kpn: ENTER_ROOM_KPN.to_string(),
            kpf: ENTER_ROOM_KPF.to_string(),
        };
        let frame = proto::SocketMessage {
            payload_type: payload_type::CS_ENTER_ROOM,
            payload: enter.encode_to_vec(),
            ..Default::default()
        };
        Message::Binary(Bytes::from(frame.encode_to_vec()))
    }

    fn payload(frame: &proto::SocketMessage) -> Result<Vec<u8>> {
        if frame.compression_type != compression_type::GZIP {
            return Ok(frame.payload.clone());
        }
        let mut decoder = GzDecoder::new(frame.payload.as_slice());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| DanmakuError::protocol(format!("Failed to decompress gzip: {e}")))?;
        Ok(decompressed)
    }

    fn feed_events(push: proto::ScWebFeedPush) -> Vec<KuaishouEvent> {
        push.comment_feeds
            .into_iter()
            .map(KuaishouEvent::Comment)
            .chain(push.like_feeds.into_iter().map(KuaishouEvent::Like))
            .chain(push.gift_feeds.into_iter().map(KuaishouEvent::Gift))
            .collect()
    }
}

#[async_trait]
impl DanmuProtocol for KuaishouDanmuProtocol {
    type Event = KuaishouEvent;

    fn platform(&self) -> Platform {
        Platform::Kuaishou
    }

    async fn resolve(&mut self, room_id: &str) -> Result<()> {
        if !Platform::Kuaishou.validate_room_id(room_id) {
            return Err(DanmakuError::InvalidRoomId(room_id.to_string()));
        }
        let (live_url, eid) = api::resolve_share_link(&self.client, room_id).await?;
        let session = api::fetch_live_session(&self.client, &live_url, &eid).await?;
        self.live_url = live_url;
        self.eid = eid;
        self.session = Some(session);
        self.fresh_session = true;
        Ok(())
    }

    async fn websocket_url(&mut self, room_id: &str) -> Result<String> {
        if self.eid.is_empty() {
            return Err(DanmakuError::protocol(format!("room {room_id} not resolved")));
        }
        // Tokens are single use, reconnects need a new session.
        if !std::mem::take(&mut self.fresh_session) {
            let session = api::fetch_live_session(&self.client, &self.live_url, &self.eid).await?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .map(|s| s.websocket_url.clone())
            .ok_or_else(|| DanmakuError::protocol(format!("room {room_id} has no live session")))
    }

    fn headers(&self, _room_id: &str) -> Vec<(String, String)> {
        vec![("User-Agent".to_string(), MOBILE_UA.to_string())]
    }

    fn cookies(&self) -> Option<String> {
        self.cookies.clone()
    }

    fn handshake_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| DanmakuError::protocol(format!("room {room_id} not resolved")))?;
        Ok(vec![Self::enter_room_frame(session)])
    }

    fn heartbeat_message(&self) -> Option<Message> {
        Some(Message::Binary(Bytes::from_static(HEARTBEAT)))
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn decode_message(&mut self, message: &Message) -> Result<DecodedFrame<KuaishouEvent>> {
        let Message::Binary(data) = message else {
            return Ok(DecodedFrame::empty());
        };

        let frame = proto::SocketMessage::decode(data.as_ref())?;
        match frame.payload_type {
            payload_type::SC_FEED_PUSH => {
                let push = proto::ScWebFeedPush::decode(Self::payload(&frame)?.as_slice())?;
                Ok(DecodedFrame::events(Self::feed_events(push)))
            }
            payload_type::SC_LIVE_CHAT_ENDED => {
                debug!(eid = %self.eid, "Kuaishou live ended");
                Ok(DecodedFrame::events(vec![KuaishouEvent::LiveEnded]).finish())
            }
            payload_type::SC_HEARTBEAT_ACK | payload_type::SC_ENTER_ROOM_ACK => {
                Ok(DecodedFrame::empty())
            }
            other => {
                trace!("Ignored kuaishou payload type {}", other);
                Ok(DecodedFrame::empty())
            }
        }
    }
}

pub type KuaishouDanmuProvider = WebSocketDanmuProvider<KuaishouDanmuProtocol>;

pub fn create_kuaishou_danmu_provider(
    client: Client,
    cookies: Option<String>,
    config: Option<WebSocketProviderConfig>,
) -> KuaishouDanmuProvider {
    WebSocketDanmuProvider::with_protocol(KuaishouDanmuProtocol::new(client, cookies), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::default_client;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn protocol() -> KuaishouDanmuProtocol {
        KuaishouDanmuProtocol::new(default_client().unwrap(), None)
    }

    fn user(name: &str) -> Option<proto::SimpleUserInfo> {
        Some(proto::SimpleUserInfo {
            principal_id: format!("{name}_id"),
            user_name: name.to_string(),
            head_url: format!("https://k/{name}.jpg"),
        })
    }

    fn socket_message(payload_type: i32, payload: Vec<u8>, gzip: bool) -> Message {
        let (compression_type, payload) = if gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload).unwrap();
            (compression_type::GZIP, encoder.finish().unwrap())
        } else {
            (0, payload)
        };
        let frame = proto::SocketMessage {
            payload_type,
            compression_type,
            payload,
        };
        Message::Binary(Bytes::from(frame.encode_to_vec()))
    }

    #[test]
    fn test_heartbeat_frame() {
        let frame = proto::SocketMessage::decode(HEARTBEAT).unwrap();
        assert_eq!(frame.payload_type, payload_type::CS_HEARTBEAT);
        assert!(!frame.payload.is_empty());
        assert_eq!(protocol().heartbeat_interval(), Duration::from_secs(20));
    }

    #[test]
    fn test_enter_room_frame() {
        let session = LiveSession {
            token: "token".to_string(),
            live_stream_id: "stream".to_string(),
            websocket_url: "wss://example".to_string(),
        };
        let Message::Binary(data) = KuaishouDanmuProtocol::enter_room_frame(&session) else {
            panic!("expected binary frame");
        };
        assert_eq!(&data[..3], &[0x08, 0xC8, 0x01]);

        let frame = proto::SocketMessage::decode(data.as_ref()).unwrap();
        assert_eq!(frame.payload_type, payload_type::CS_ENTER_ROOM);
        let enter = proto::CsWebEnterRoom::decode(frame.payload.as_slice()).unwrap();
        assert_eq!(enter.token, "token");
        assert_eq!(enter.live_stream_id, "stream");
        assert_eq!(enter.kpn, "KUAISHOU_H5");
        assert_eq!(enter.kpf, "OUTSIDE_IOS_H5");
    }

    #[test]
    fn test_handshake_requires_session() {
        assert!(protocol().handshake_messages("3xabc").is_err());
    }

    #[test]
    fn test_feed_push_dispatch() {
        let push = proto::ScWebFeedPush {
            comment_feeds: vec![proto::WebCommentFeed {
                id: "c1".to_string(),
                user: user("alice"),
                content: "666".to_string(),
            }],
            like_feeds: vec![proto::WebLikeFeed {
                id: "l1".to_string(),
                user: user("bob"),
            }],
            gift_feeds: vec![proto::WebGiftFeed {
                id: "g1".to_string(),
                user: user("carol"),
                gift_id: 1,
                combo_count: 3,
                ..Default::default()
            }],
            ..Default::default()
        };

        for gzip in [false, true] {
            let message = socket_message(payload_type::SC_FEED_PUSH, push.encode_to_vec(), gzip);
            let decoded = protocol().decode_message(&message).unwrap();
            assert_eq!(decoded.events.len(), 3);
            assert!(matches!(&decoded.events[0], KuaishouEvent::Comment(c) if c.content == "666"));
            assert!(matches!(&decoded.events[1], KuaishouEvent::Like(_)));
            assert!(matches!(&decoded.events[2], KuaishouEvent::Gift(g) if g.combo_count == 3));
            assert_eq!(
                decoded.events[2].user().map(|u| u.user_name.as_str()),
                Some("carol")
            );
            assert!(!decoded.finished);
        }
    }

    #[test]
    fn test_live_ended_finishes_stream() {
        let message = socket_message(payload_type::SC_LIVE_CHAT_ENDED, vec![], false);
        let decoded = protocol().decode_message(&message).unwrap();
        assert_eq!(decoded.events, vec![KuaishouEvent::LiveEnded]);
        assert!(decoded.finished);
    }

    #[test]
    fn test_acks_and_unknown_types_are_ignored() {
        for kind in [payload_type::SC_HEARTBEAT_ACK, payload_type::SC_ENTER_ROOM_ACK, 999] {
            let decoded = protocol()
                .decode_message(&socket_message(kind, vec![], false))
                .unwrap();
            assert!(decoded.events.is_empty());
        }
        let text = Message::Text("hello".into());
        assert!(protocol().decode_message(&text).unwrap().events.is_empty());
    }

    #[test]
    fn test_corrupt_gzip_is_error() {
        let frame = proto::SocketMessage {
            payload_type: payload_type::SC_FEED_PUSH,
            compression_type: compression_type::GZIP,
            payload: b"nope".to_vec(),
        };
        let message = Message::Binary(Bytes::from(frame.encode_to_vec()));
        assert!(protocol().decode_message(&message).is_err());
    }
}
