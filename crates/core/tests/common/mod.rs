//! Shared fixture builders for the core integration tests.
//!
//! These construct obfuscated samples the same way the obfuscation family
//! does: marshal-serialize a code object, wrap it in encode/compress layers,
//! optionally encrypt the blob as a Fernet token, and embed the result in
//! source text under the conventional variable names.

#![allow(dead_code)]

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use data_encoding::{BASE64, BASE64URL};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use peelback_core::chain::{apply_inverse_chain, Transform};
use peelback_core::marshal::{dumps_code, CodeObject, Value};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// A small module-level code object with recognizable content:
/// `LOAD_CONST 0 (None); RETURN_VALUE` plus a few names and constants.
pub fn sample_code() -> CodeObject {
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.stacksize = 1;
    code.code = vec![100, 0, 0, 83];
    code.consts = vec![Value::None, Value::Str(b"hello".to_vec()), Value::Int(42)];
    code.names = vec!["socket".to_string(), "system".to_string()];
    code
}

/// Marshal bytes of the sample code object.
pub fn sample_marshal() -> Vec<u8> {
    dumps_code(&sample_code())
}

/// Marshal bytes of an entirely empty code object.
pub fn empty_marshal() -> Vec<u8> {
    dumps_code(&CodeObject::empty("payload.py", "<module>"))
}

/// Encode `bytes` so that decoding with `chain` recovers them.
pub fn encode_for(chain: &[Transform], bytes: &[u8]) -> Vec<u8> {
    apply_inverse_chain(chain, bytes)
}

/// Deterministic 32-byte Fernet key fixture.
pub fn test_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(7).wrapping_add(3);
    }
    key
}

/// Build a valid Fernet token (base64url text) encrypting `plaintext`.
pub fn fernet_token(plaintext: &[u8], key: &[u8; 32]) -> String {
    let iv = [0x24u8; 16];
    let timestamp: u64 = 1_700_000_000;

    let enc_key: [u8; 16] = key[16..32].try_into().unwrap();
    let cipher = Aes128CbcEnc::new(&enc_key.into(), &iv.into());
    let mut buf = vec![0u8; plaintext.len() + 16];
    buf[..plaintext.len()].copy_from_slice(plaintext);
    let ciphertext =
        cipher.encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len()).unwrap().to_vec();

    let mut token = Vec::with_capacity(25 + ciphertext.len() + 32);
    token.push(0x80);
    token.extend_from_slice(&timestamp.to_be_bytes());
    token.extend_from_slice(&iv);
    token.extend_from_slice(&ciphertext);

    let mut mac = HmacSha256::new_from_slice(&key[..16]).unwrap();
    mac.update(&token);
    token.extend_from_slice(&mac.finalize().into_bytes());

    BASE64URL.encode(&token)
}

/// Standard-alphabet base64 of a key, as it appears in obfuscated source.
pub fn key_b64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

pub fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compose obfuscated source text with the conventional variable names.
pub fn obfuscated_source(key_b64: Option<&str>, payload_hex: &str) -> String {
    let mut source = String::from("#!/usr/bin/env python3\n# harmless-looking loader\n");
    if let Some(key) = key_b64 {
        source.push_str(&format!("__mikey__ = \"{key}\"\n"));
    }
    source.push_str(&format!("mydata = \"{payload_hex}\"\n"));
    source.push_str("print('nothing to see here')\n");
    source
}
