//! Huya (虎牙) danmu via a local relay.
//!
//! Huya's own protocol is handled by an external helper process. It listens on
//! a local port and forwards one JSON object per text frame; the URL of that
//! relay comes from the configured [`SignatureProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::trace;

use crate::Platform;
use crate::danmaku::websocket::{DanmuProtocol, DecodedFrame, WebSocketDanmuProvider};
use crate::danmaku::{DanmakuError, Result, SignatureProvider, WebSocketProviderConfig};

/// Relay heartbeat. The relay treats any text as keep-alive.
const HEARTBEAT: &str = "ping";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuyaUser {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub rid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuyaChat {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub from: HuyaUser,
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuyaGift {
    #[serde(default)]
    pub time: i64,
    /// Gift name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub from: HuyaUser,
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub price: u64,
    /// Total value in hundredths of a yuan.
    #[serde(default)]
    pub earn: u64,
}

impl HuyaGift {
    pub fn total_price(&self) -> f64 {
        self.earn as f64 / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HuyaEvent {
    Chat(HuyaChat),
    Gift(HuyaGift),
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

pub struct HuyaDanmuProtocol {
    signer: Arc<dyn SignatureProvider>,
}

impl HuyaDanmuProtocol {
    pub fn new(signer: Arc<dyn SignatureProvider>) -> Self {
        Self { signer }
    }

    fn parse(text: &str) -> Result<Option<HuyaEvent>> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("chat") | Some("gift") => Ok(Some(serde_json::from_value(value)?)),
            other => {
                trace!("Ignored huya relay message type {:?}", other);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl DanmuProtocol for HuyaDanmuProtocol {
    type Event = HuyaEvent;

    fn platform(&self) -> Platform {
        Platform::Huya
    }

    async fn resolve(&mut self, room_id: &str) -> Result<()> {
        if !Platform::Huya.validate_room_id(room_id) {
            return Err(DanmakuError::InvalidRoomId(room_id.to_string()));
        }
        Ok(())
    }

    async fn websocket_url(&mut self, room_id: &str) -> Result<String> {
        self.signer.compute_signature(room_id.trim()).await
    }

    fn heartbeat_message(&self) -> Option<Message> {
        Some(Message::Text(HEARTBEAT.into()))
    }

    fn decode_message(&mut self, message: &Message) -> Result<DecodedFrame<HuyaEvent>> {
        let text = match message {
            Message::Text(text) => text.as_str(),
            Message::Binary(data) => std::str::from_utf8(data)
                .map_err(|e| DanmakuError::protocol(format!("non-utf8 relay frame: {e}")))?,
            _ => return Ok(DecodedFrame::empty()),
        };
        if text.trim().is_empty() || text == "pong" {
            return Ok(DecodedFrame::empty());
        }
        Ok(DecodedFrame::events(Self::parse(text)?.into_iter().collect()))
    }
}

pub type HuyaDanmuProvider = WebSocketDanmuProvider<HuyaDanmuProtocol>;

pub fn create_huya_danmu_provider(
    signer: Arc<dyn SignatureProvider>,
    config: Option<WebSocketProviderConfig>,
) -> HuyaDanmuProvider {
    WebSocketDanmuProvider::with_protocol(HuyaDanmuProtocol::new(signer), config)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRelay;

    #[async_trait]
    impl SignatureProvider for FixedRelay {
        async fn compute_signature(&self, room_id: &str) -> Result<String> {
            Ok(format!("ws://127.0.0.1:9000/{room_id}"))
        }
    }

    fn protocol() -> HuyaDanmuProtocol {
        HuyaDanmuProtocol::new(Arc::new(FixedRelay))
    }

    #[test]
    fn test_chat_dispatch() {
        let text = r#"{"type":"chat","time":1700000000000,"from":{"name":"alice","rid":"1234"},"id":"m1","content":"666"}"#;
        let decoded = protocol().decode_message(&Message::Text(text.into())).unwrap();
        assert_eq!(
            decoded.events,
            vec![HuyaEvent::Chat(HuyaChat {
                time: 1700000000000,
                from: HuyaUser {
                    name: "alice".to_string(),
                    rid: "1234".to_string(),
                },
                id: "m1".to_string(),
                content: "666".to_string(),
            })]
        );
    }

    #[test]
    fn test_gift_dispatch_and_price() {
        let text = r#"{"type":"gift","name":"虎粮","from":{"name":"bob","rid":5678},"id":"g1","count":10,"price":10,"earn":1050}"#;
        let decoded = protocol().decode_message(&Message::Text(text.into())).unwrap();
        let [HuyaEvent::Gift(gift)] = decoded.events.as_slice() else {
            panic!("expected one gift, got {:?}", decoded.events);
        };
        assert_eq!(gift.name, "虎粮");
        assert_eq!(gift.from.rid, "5678");
        assert_eq!(gift.count, 10);
        assert_eq!(gift.total_price(), 10.5);
    }

    #[test]
    fn test_raw_keeps_type_tag() {
        let event = HuyaEvent::Chat(HuyaChat::default());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "chat");
    }

    #[test]
    fn test_unknown_and_malformed_frames() {
        let mut protocol = protocol();
        let unknown = Message::Text(r#"{"type":"online","count":3}"#.into());
        assert!(protocol.decode_message(&unknown).unwrap().events.is_empty());
        assert!(protocol.decode_message(&Message::Text("pong".into())).unwrap().events.is_empty());
        assert!(protocol.decode_message(&Message::Text("{oops".into())).is_err());
    }

    #[tokio::test]
    async fn test_websocket_url_from_signer() {
        let mut protocol = protocol();
        protocol.resolve("kaerlol").await.unwrap();
        assert_eq!(
            protocol.websocket_url("kaerlol").await.unwrap(),
            "ws://127.0.0.1:9000/kaerlol"
        );
        assert!(protocol.resolve(" ").await.is_err());
    }
}
