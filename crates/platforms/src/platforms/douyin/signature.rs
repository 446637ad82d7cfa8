//! Native X-Bogus signer for the webcast push URL.

use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::danmaku::{Result, SignatureProvider};

/// X-Bogus output alphabet, indexed like standard base64.
const ALPHABET: &[u8; 64] = b"Dkdpgh4ZKsQB80/Mfvw36XI1R25+WUAlEi7NLboqYTOPuzmFjJnryx9HVGcaStCe";

/// Trailing bytes of md5(bytes(md5(""))).
const EMPTY_BODY_HASH: [u8; 2] = [0x45, 0x3f];

/// Environment and user-agent codes the browser SDK reports.
const ENV_CODE: u16 = 1;
const UA_CODE: u8 = 0x0e;

fn rc4(key: u8, data: &mut [u8]) {
    let mut s: [u8; 256] = core::array::from_fn(|i| i as u8);
    let mut j = 0usize;
    for i in 0..256 {
        j = (j + s[i] as usize + key as usize) & 0xff;
        s.swap(i, j);
    }

    let (mut i, mut j) = (0usize, 0usize);
    for byte in data.iter_mut() {
        i = (i + 1) & 0xff;
        j = (j + s[i] as usize) & 0xff;
        s.swap(i, j);
        *byte ^= s[(s[i] as usize + s[j] as usize) & 0xff];
    }
}

fn encode(data: &[u8; 12]) -> String {
    let mut out = String::with_capacity(16);
    for chunk in data.chunks_exact(3) {
        let n = (u32::from(chunk[0]) << 16) | (u32::from(chunk[1]) << 8) | u32::from(chunk[2]);
        for shift in [18, 12, 6, 0] {
            out.push(ALPHABET[((n >> shift) & 0x3f) as usize] as char);
        }
    }
    out
}

/// Last two bytes of md5 over the bytes a hex digest encodes.
fn hex_digest_tail(hex: &str) -> Option<[u8; 2]> {
    if hex.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    let hash = Md5::digest(bytes);
    Some([hash[14], hash[15]])
}

/// Hex md5 of `input`.
pub fn md5_hex(input: &str) -> String {
    Md5::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Sign a 32-char hex digest with the given random seeds.
fn sign_digest(digest: &str, counter: u8, seed: u8, key: u8) -> String {
    let tail = hex_digest_tail(digest).unwrap_or(EMPTY_BODY_HASH);
    let mut payload = [
        counter & 0x3f,
        (ENV_CODE >> 8) as u8,
        ENV_CODE as u8,
        UA_CODE,
        EMPTY_BODY_HASH[0],
        EMPTY_BODY_HASH[1],
        tail[0],
        tail[1],
        key,
        0,
    ];
    payload[9] = payload[..9].iter().fold(0, |acc, b| acc ^ b);
    rc4(key, &mut payload);

    let mut frame = [0u8; 12];
    frame[0] = 0x40 | (seed & 0x1f);
    frame[1] = key;
    frame[2..].copy_from_slice(&payload);
    encode(&frame)
}

/// Sign a 32-char hex digest. The result is always 16 characters.
pub fn generate_xbogus(digest: &str, counter: u8) -> String {
    let seed = rand::random::<u8>();
    let key = (u16::from(rand::random::<u8>()) * 255 / 256) as u8;
    sign_digest(digest, counter, seed, key)
}

/// Signs the comma-joined parameter string of a push URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct XBogusSigner;

#[async_trait]
impl SignatureProvider for XBogusSigner {
    async fn compute_signature(&self, input: &str) -> Result<String> {
        Ok(generate_xbogus(&md5_hex(input), 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_tail() {
        assert_eq!(
            hex_digest_tail("56a634b4228ef02b53388ada4e6f76c7"),
            Some([0x26, 0x54])
        );
        assert_eq!(hex_digest_tail(&md5_hex("")), Some(EMPTY_BODY_HASH));
        assert_eq!(hex_digest_tail("xyz"), None);
    }

    #[test]
    fn test_signature_shape() {
        let sig = generate_xbogus(&md5_hex("live_id=1,aid=6383"), 1);
        assert_eq!(sig.len(), 16);
        assert!(sig.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn test_signature_is_deterministic_for_fixed_seeds() {
        let digest = md5_hex("room_id=1");
        assert_eq!(
            sign_digest(&digest, 1, 7, 42),
            sign_digest(&digest, 1, 7, 42)
        );
        assert_ne!(
            sign_digest(&digest, 1, 7, 42),
            sign_digest(&digest, 1, 7, 43)
        );
    }

    #[tokio::test]
    async fn test_signer_trait() {
        let sig = XBogusSigner.compute_signature("a=1").await.unwrap();
        assert_eq!(sig.len(), 16);
    }
}
