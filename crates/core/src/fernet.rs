//! Layer Decryptor: best-effort Fernet token decryption.
//!
//! A Fernet token is the base64url text of:
//! version byte `0x80` || 8-byte big-endian timestamp || 16-byte IV ||
//! AES-128-CBC/PKCS7 ciphertext || HMAC-SHA256 tag over everything before
//! the tag. The 32-byte key splits into a signing half (first 16 bytes) and
//! an encryption half (last 16 bytes). Timestamp/TTL semantics are ignored
//! here; this tool only cares about recovering plaintext.
//!
//! Decryption failure is always recovered locally: the payload may have been
//! only encoded, not encrypted, so the chain resolver downstream can still
//! make sense of the raw bytes. `decrypt` therefore never errors; it returns
//! the best-effort buffer tagged with whether decryption actually happened.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use data_encoding::BASE64URL;
use hmac::{Hmac, Mac};
use log::debug;
use sha2::Sha256;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Token layout offsets.
const VERSION: u8 = 0x80;
const HEADER_LEN: usize = 1 + 8 + 16; // version + timestamp + IV
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

/// Decrypt `payload` as a Fernet token under `key`, falling back to the raw
/// bytes when no key is present or the token does not authenticate.
///
/// The boolean reports whether decryption actually succeeded, for diagnostic
/// reporting only; callers proceed with the returned buffer either way.
pub fn decrypt(payload: &[u8], key: Option<&[u8]>) -> (Vec<u8>, bool) {
    let Some(key) = key else {
        return (payload.to_vec(), false);
    };
    match decrypt_token(payload, key) {
        Some(plaintext) => (plaintext, true),
        None => {
            debug!("fernet decryption failed, falling back to raw payload");
            (payload.to_vec(), false)
        }
    }
}

/// Strict token decryption. Returns `None` on any format, authentication, or
/// padding failure.
fn decrypt_token(payload: &[u8], key: &[u8]) -> Option<Vec<u8>> {
    if key.len() != 32 {
        return None;
    }

    // The payload bytes are the ASCII base64url text of the token, possibly
    // line-wrapped by the obfuscator.
    let text: Vec<u8> =
        payload.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    let token = BASE64URL.decode(&text).ok()?;

    if token.len() < HEADER_LEN + BLOCK_LEN + TAG_LEN || token[0] != VERSION {
        return None;
    }
    let (signed, tag) = token.split_at(token.len() - TAG_LEN);
    let ciphertext = &signed[HEADER_LEN..];
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return None;
    }

    // Verify the HMAC before touching the ciphertext.
    let mut mac = HmacSha256::new_from_slice(&key[..16]).ok()?;
    mac.update(signed);
    mac.verify_slice(tag).ok()?;

    let iv: [u8; 16] = signed[9..HEADER_LEN].try_into().ok()?;
    let enc_key: [u8; 16] = key[16..32].try_into().ok()?;

    let cipher = Aes128CbcDec::new(&enc_key.into(), &iv.into());
    let mut buf = ciphertext.to_vec();
    cipher.decrypt_padded_mut::<Pkcs7>(&mut buf).ok().map(<[u8]>::to_vec)
}
