mod common;

use peelback_core::chain::{
    apply_chain, apply_inverse_chain, blind_fallback, resolve, ChainError, Transform,
    CANDIDATE_CHAINS, FALLBACK_CHAIN,
};

#[test]
fn inverse_then_apply_round_trips_every_candidate() {
    let bytes = common::sample_marshal();
    for chain in CANDIDATE_CHAINS {
        let encoded = apply_inverse_chain(chain, &bytes);
        let decoded = apply_chain(chain, &encoded).expect("chain should fully apply");
        assert_eq!(decoded, bytes, "chain {chain:?}");
    }
}

#[test]
fn resolver_selects_each_candidate_chain() {
    // For every candidate, encode a valid code object through the chain's
    // inverse and check the resolver picks exactly that chain back out.
    let bytes = common::sample_marshal();
    for chain in CANDIDATE_CHAINS {
        let encoded = apply_inverse_chain(chain, &bytes);
        let resolved = resolve(&encoded).expect("resolution should succeed");
        assert_eq!(resolved.chain, chain.to_vec(), "encoded via {chain:?}");
        assert_eq!(resolved.bytes, bytes);
    }
}

#[test]
fn resolver_tolerates_line_wrapped_encodings() {
    let bytes = common::sample_marshal();
    let encoded = apply_inverse_chain(&[Transform::Base64], &bytes);
    let text = String::from_utf8(encoded).expect("base64 is ascii");
    let wrapped: String = text
        .as_bytes()
        .chunks(40)
        .map(|chunk| std::str::from_utf8(chunk).unwrap())
        .collect::<Vec<_>>()
        .join("\n");

    let resolved = resolve(wrapped.as_bytes()).expect("resolution should succeed");
    assert_eq!(resolved.chain, vec![Transform::Base64]);
    assert_eq!(resolved.bytes, bytes);
}

#[test]
fn garbage_input_yields_no_valid_chain() {
    let err = resolve(b"definitely not an encoded payload").unwrap_err();
    assert!(matches!(err, ChainError::NoValidChain));
}

#[test]
fn applied_but_invalid_candidate_is_not_accepted() {
    // Valid base64 of bytes that are not a code object: the base64-only
    // candidate applies cleanly but must fail the validation oracle.
    let encoded = apply_inverse_chain(&[Transform::Base64], b"junk payload bytes");
    let err = resolve(&encoded).unwrap_err();
    assert!(matches!(err, ChainError::NoValidChain));
}

#[test]
fn blind_fallback_applies_the_full_chain_without_validation() {
    // Works even for payloads that are not code objects at all.
    let blob = apply_inverse_chain(FALLBACK_CHAIN, b"arbitrary bytes");
    let out = blind_fallback(&blob).expect("fallback should apply");
    assert_eq!(out, b"arbitrary bytes");
}

#[test]
fn blind_fallback_reports_the_failing_step() {
    let err = blind_fallback(b"!!!not-base64!!!").unwrap_err();
    match err {
        ChainError::StepFailed { transform, .. } => assert_eq!(transform, Transform::Base64),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn corrupt_zlib_stream_abandons_the_candidate() {
    let bytes = common::sample_marshal();
    let mut compressed = apply_inverse_chain(&[Transform::Zlib], &bytes);
    let last = compressed.len() - 1;
    compressed[last] ^= 0xff;
    // The only chain that could match is [zlib], and its stream is corrupt.
    let err = resolve(&compressed).unwrap_err();
    assert!(matches!(err, ChainError::NoValidChain));
}
