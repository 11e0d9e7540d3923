mod common;

use peelback_core::marshal::{
    dumps, dumps_code, loads, loads_code, CodeObject, MarshalError, Value, MAX_DEPTH,
};

#[test]
fn scalar_values_round_trip() {
    let values = vec![
        Value::None,
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(0),
        Value::Int(-7),
        Value::Int(i64::from(i32::MAX)),
        Value::Float(2.5),
        Value::Str(b"bytes\x00with\xffjunk".to_vec()),
        Value::Unicode("caf\u{e9}".to_string()),
    ];
    for value in values {
        let loaded = loads(&dumps(&value)).expect("round trip should load");
        assert_eq!(loaded, value, "{}", value.type_name());
    }
}

#[test]
fn containers_round_trip() {
    let value = Value::Tuple(vec![
        Value::List(vec![Value::Int(1), Value::None]),
        Value::Dict(vec![(Value::Str(b"k".to_vec()), Value::Int(9))]),
        Value::Tuple(vec![]),
    ]);
    assert_eq!(loads(&dumps(&value)).expect("round trip should load"), value);
}

#[test]
fn code_object_round_trips_with_all_fields() {
    let code = common::sample_code();
    let loaded = loads_code(&dumps_code(&code)).expect("code should load");
    assert_eq!(loaded, code);
}

#[test]
fn nested_code_objects_survive() {
    let mut outer = common::sample_code();
    let mut inner = CodeObject::empty("payload.py", "helper");
    inner.code = vec![100, 0, 0, 83];
    inner.consts = vec![Value::None];
    outer.consts.push(Value::Code(Box::new(inner.clone())));

    let loaded = loads_code(&dumps_code(&outer)).expect("code should load");
    let nested: Vec<&CodeObject> = loaded.nested_code().collect();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].name, "helper");
    assert_eq!(*nested[0], inner);
}

#[test]
fn interned_string_backreferences_resolve() {
    // t <4:"spam"> then R <0> inside a tuple.
    let mut data = vec![b'('];
    data.extend_from_slice(&2u32.to_le_bytes());
    data.push(b't');
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(b"spam");
    data.push(b'R');
    data.extend_from_slice(&0u32.to_le_bytes());

    let loaded = loads(&data).expect("backreference should resolve");
    let expected =
        Value::Tuple(vec![Value::Str(b"spam".to_vec()), Value::Str(b"spam".to_vec())]);
    assert_eq!(loaded, expected);
}

#[test]
fn stringref_out_of_range_is_rejected() {
    let mut data = vec![b'R'];
    data.extend_from_slice(&3u32.to_le_bytes());
    let err = loads(&data).unwrap_err();
    assert!(matches!(err, MarshalError::BadStringRef { index: 3, .. }));
}

#[test]
fn trailing_bytes_after_top_level_value_are_ignored() {
    let mut data = dumps(&Value::Int(5));
    data.extend_from_slice(b"trailing garbage");
    assert_eq!(loads(&data).expect("leading value should load"), Value::Int(5));
}

#[test]
fn empty_input_is_truncated() {
    let err = loads(&[]).unwrap_err();
    assert!(matches!(err, MarshalError::Truncated { offset: 0 }));
}

#[test]
fn unknown_type_code_is_rejected_with_offset() {
    let mut data = vec![b'('];
    data.extend_from_slice(&1u32.to_le_bytes());
    data.push(b'?');
    let err = loads(&data).unwrap_err();
    assert!(matches!(err, MarshalError::UnknownType { code: b'?', offset: 5 }));
}

#[test]
fn hostile_string_length_is_rejected_before_allocation() {
    // 's' claiming 4 GiB of content with 4 bytes of input behind it.
    let mut data = vec![b's'];
    data.extend_from_slice(&u32::MAX.to_le_bytes());
    data.extend_from_slice(b"abcd");
    let err = loads(&data).unwrap_err();
    assert!(matches!(err, MarshalError::LengthOutOfBounds { .. }));
}

#[test]
fn hostile_tuple_count_is_rejected() {
    let mut data = vec![b'('];
    data.extend_from_slice(&0x1000_0000u32.to_le_bytes());
    let err = loads(&data).unwrap_err();
    assert!(matches!(err, MarshalError::LengthOutOfBounds { .. }));
}

#[test]
fn nesting_bomb_hits_the_depth_limit() {
    // A list-of-list chain deeper than MAX_DEPTH, each level claiming one
    // element. The depth check must fire before the input runs out.
    let mut data = Vec::new();
    for _ in 0..MAX_DEPTH + 8 {
        data.push(b'[');
        data.extend_from_slice(&1u32.to_le_bytes());
    }
    data.push(b'N');
    // Pad so every read_count bounds check passes.
    data.resize(data.len() + MAX_DEPTH + 8, b'N');
    let err = loads(&data).unwrap_err();
    assert!(matches!(err, MarshalError::DepthExceeded));
}

#[test]
fn long_wider_than_i64_is_rejected() {
    let mut data = vec![b'l'];
    data.extend_from_slice(&6i32.to_le_bytes());
    for _ in 0..6 {
        data.extend_from_slice(&0x7fffu16.to_le_bytes());
    }
    let err = loads(&data).unwrap_err();
    assert!(matches!(err, MarshalError::LongOverflow { .. }));
}

#[test]
fn negative_long_round_trips() {
    let value = Value::Int(-123_456_789_012);
    assert_eq!(loads(&dumps(&value)).expect("should load"), value);
}

#[test]
fn loads_code_rejects_non_code_top_level() {
    let err = loads_code(&dumps(&Value::Int(1))).unwrap_err();
    assert!(matches!(err, MarshalError::NotACodeObject { actual: "int" }));
}

#[test]
fn code_object_with_wrong_field_type_is_rejected() {
    // Replace the argcount field region: a code object whose first field is
    // fine but whose code field is a tuple instead of a string.
    let mut data = vec![b'c'];
    for _ in 0..4 {
        data.extend_from_slice(&0u32.to_le_bytes());
    }
    data.push(b'(');
    data.extend_from_slice(&0u32.to_le_bytes());
    let err = loads(&data).unwrap_err();
    assert!(matches!(err, MarshalError::BadCodeField { field: "code" }));
}

#[test]
fn truncated_inputs_error_cleanly_at_every_length() {
    let full = common::sample_marshal();
    for len in 0..full.len() {
        assert!(loads(&full[..len]).is_err(), "prefix of length {len}");
    }
}

#[test]
fn random_inputs_never_panic() {
    // Cheap deterministic fuzz: the loader must reject or accept, never panic.
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    for round in 0..256 {
        let len = (round % 97) + 1;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            data.push((state >> 33) as u8);
        }
        let _ = loads(&data);
    }
}
