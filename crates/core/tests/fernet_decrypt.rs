mod common;

use peelback_core::fernet::decrypt;

#[test]
fn no_key_returns_payload_unchanged() {
    let payload = b"not even a token".to_vec();
    let (out, decrypted) = decrypt(&payload, None);
    assert_eq!(out, payload);
    assert!(!decrypted);
}

#[test]
fn valid_token_decrypts() {
    let key = common::test_key();
    let plaintext = b"the hidden layer";
    let token = common::fernet_token(plaintext, &key);

    let (out, decrypted) = decrypt(token.as_bytes(), Some(&key));
    assert!(decrypted);
    assert_eq!(out, plaintext);
}

#[test]
fn line_wrapped_token_still_decrypts() {
    let key = common::test_key();
    let token = common::fernet_token(b"wrapped", &key);
    let (head, tail) = token.split_at(20);
    let wrapped = format!("{head}\n{tail}");

    let (out, decrypted) = decrypt(wrapped.as_bytes(), Some(&key));
    assert!(decrypted);
    assert_eq!(out, b"wrapped");
}

#[test]
fn tampered_tag_falls_back_to_raw_bytes() {
    let key = common::test_key();
    let mut token = common::fernet_token(b"payload", &key).into_bytes();
    // Flip a character inside the base64 body; the HMAC must reject it.
    let mid = token.len() / 2;
    token[mid] = if token[mid] == b'A' { b'B' } else { b'A' };

    let (out, decrypted) = decrypt(&token, Some(&key));
    assert!(!decrypted);
    assert_eq!(out, token);
}

#[test]
fn wrong_key_falls_back_to_raw_bytes() {
    let key = common::test_key();
    let token = common::fernet_token(b"payload", &key);
    let other = [0x99u8; 32];

    let (out, decrypted) = decrypt(token.as_bytes(), Some(&other));
    assert!(!decrypted);
    assert_eq!(out, token.as_bytes());
}

#[test]
fn non_token_payload_with_key_falls_back() {
    let key = common::test_key();
    let payload = b"\x00\x01\x02 binary that is not base64url";
    let (out, decrypted) = decrypt(payload, Some(&key));
    assert!(!decrypted);
    assert_eq!(out, payload);
}

#[test]
fn undersized_key_falls_back() {
    let key = common::test_key();
    let token = common::fernet_token(b"payload", &key);
    let (_, decrypted) = decrypt(token.as_bytes(), Some(&key[..16]));
    assert!(!decrypted);
}
