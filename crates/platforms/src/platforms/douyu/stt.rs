//! Douyu STT (Serialized Text Transport) codec.
//!
//! STT encodes a flat record as `key@=value/` pairs, escaping `@` as `@A`
//! and `/` as `@S`. On the wire each record is wrapped in a packet:
//!
//! ```text
//! | len (u32 LE) | len (u32 LE) | type (u16 LE) | 0 | 0 | payload | \0 |
//! ```
//!
//! where `len` counts everything after the first length field and the message
//! type is 689 for client packets and 690 for server packets.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use crate::danmaku::{DanmakuError, Result};

/// Client → server message type.
pub const CLIENT_MSG_TYPE: u16 = 689;
/// Server → client message type.
pub const SERVER_MSG_TYPE: u16 = 690;

/// len + len + type + encrypt + reserved
const HEADER_LEN: usize = 12;

/// A decoded STT record. Ordered so that re-serialization is stable.
pub type SttRecord = BTreeMap<String, String>;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '@' => out.push_str("@A"),
            '/' => out.push_str("@S"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '@' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('A') => out.push('@'),
            Some('S') => out.push('/'),
            Some(other) => {
                out.push('@');
                out.push(other);
            }
            None => out.push('@'),
        }
    }
    out
}

/// Serialize key/value pairs in the given order.
pub fn encode(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(&escape(key));
        out.push_str("@=");
        out.push_str(&escape(value));
        out.push('/');
    }
    out
}

/// Parse a record. Segments without `@=` are ignored.
pub fn decode(payload: &str) -> SttRecord {
    payload
        .split('/')
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.split_once("@="))
        .map(|(k, v)| (unescape(k), unescape(v)))
        .collect()
}

/// Wrap an STT payload in a client packet.
pub fn encode_packet(payload: &str) -> Bytes {
    let body = payload.as_bytes();
    let len = (body.len() + HEADER_LEN - 4 + 1) as u32;

    let mut buf = BytesMut::with_capacity(body.len() + HEADER_LEN + 1);
    buf.put_u32_le(len);
    buf.put_u32_le(len);
    buf.put_u16_le(CLIENT_MSG_TYPE);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_slice(body);
    buf.put_u8(0);
    buf.freeze()
}

/// Split a binary frame into STT payloads.
///
/// A frame may carry several packets back to back. A truncated trailing packet
/// is an error so the caller can count the frame as dropped.
pub fn decode_packets(data: &[u8]) -> Result<Vec<String>> {
    let mut payloads = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < HEADER_LEN {
            return Err(DanmakuError::protocol(format!(
                "truncated STT header ({} bytes)",
                rest.len()
            )));
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let total = len + 4;
        if len < HEADER_LEN - 4 || rest.len() < total {
            return Err(DanmakuError::protocol(format!(
                "truncated STT packet: need {total} bytes, have {}",
                rest.len()
            )));
        }

        let body = &rest[HEADER_LEN..total];
        let body = body.strip_suffix(&[0u8]).unwrap_or(body);
        if !body.is_empty() {
            payloads.push(String::from_utf8_lossy(body).into_owned());
        }
        rest = &rest[total..];
    }

    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip() {
        assert_eq!(escape("a@b/c"), "a@Ab@Sc");
        assert_eq!(unescape("a@Ab@Sc"), "a@b/c");
        // "@AS" must decode to "@S", not "/".
        assert_eq!(unescape("@AS"), "@S");
        assert_eq!(unescape(&escape("@S")), "@S");
    }

    #[test]
    fn test_encode_keeps_order() {
        assert_eq!(
            encode(&[("type", "loginreq"), ("roomid", "9999")]),
            "type@=loginreq/roomid@=9999/"
        );
    }

    #[test]
    fn test_decode_record() {
        let record = decode("type@=chatmsg/nn@=a@Sb/txt@=hi@A/junk/");
        assert_eq!(record["type"], "chatmsg");
        assert_eq!(record["nn"], "a/b");
        assert_eq!(record["txt"], "hi@");
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_heartbeat_packet_layout() {
        let packet = encode_packet("type@=mrkl/");
        assert_eq!(
            packet.as_ref(),
            &[
                0x14, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0xb1, 0x02, 0x00, 0x00, b't',
                b'y', b'p', b'e', b'@', b'=', b'm', b'r', b'k', b'l', b'/', 0x00,
            ][..]
        );
    }

    #[test]
    fn test_decode_multiple_packets() {
        let mut frame = encode_packet("type@=first/").to_vec();
        frame.extend_from_slice(&encode_packet("type@=second/"));

        let payloads = decode_packets(&frame).unwrap();
        assert_eq!(payloads, vec!["type@=first/", "type@=second/"]);
    }

    #[test]
    fn test_truncated_packet_is_error() {
        let packet = encode_packet("type@=chatmsg/txt@=hello/");
        assert!(decode_packets(&packet[..packet.len() - 3]).is_err());
        assert!(decode_packets(&[0x01, 0x02]).is_err());
    }
}
