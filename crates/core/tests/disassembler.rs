mod common;

use peelback_core::disasm::{disassemble, structural_summary};
use peelback_core::marshal::{CodeObject, Value};

fn module_code() -> CodeObject {
    let mut code = CodeObject::empty("payload.py", "<module>");
    // import socket; x = socket; return 42
    code.code = vec![
        100, 0, 0, // LOAD_CONST 0 (None)
        108, 0, 0, // IMPORT_NAME 0 (socket)
        90, 1, 0, // STORE_NAME 1 (x)
        100, 1, 0, // LOAD_CONST 1 (42)
        83, // RETURN_VALUE
    ];
    code.consts = vec![Value::None, Value::Int(42)];
    code.names = vec!["socket".to_string(), "x".to_string()];
    code.firstlineno = 1;
    code.lnotab = vec![6, 1];
    code
}

#[test]
fn trace_resolves_consts_and_names() {
    let text = disassemble(&module_code());
    assert!(text.contains("LOAD_CONST"), "{text}");
    assert!(text.contains("(None)"), "{text}");
    assert!(text.contains("IMPORT_NAME"), "{text}");
    assert!(text.contains("(socket)"), "{text}");
    assert!(text.contains("STORE_NAME"), "{text}");
    assert!(text.contains("(x)"), "{text}");
    assert!(text.contains("RETURN_VALUE"), "{text}");
}

#[test]
fn trace_carries_line_numbers_from_lnotab() {
    let text = disassemble(&module_code());
    let first = text.lines().next().expect("trace is non-empty");
    assert!(first.trim_start().starts_with('1'), "{first}");
    // The lnotab advances to line 2 at offset 6.
    assert!(text.lines().any(|l| l.trim_start().starts_with("2") && l.contains("STORE_NAME")));
}

#[test]
fn unknown_opcodes_are_reported_inline() {
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.code = vec![6, 83]; // 6 is undefined in 2.7
    let text = disassemble(&code);
    assert!(text.contains("<unknown 0x06>"), "{text}");
    assert!(text.contains("RETURN_VALUE"), "{text}");
}

#[test]
fn truncated_argument_does_not_panic() {
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.code = vec![100, 0]; // LOAD_CONST missing one argument byte
    let text = disassemble(&code);
    assert!(text.contains("<truncated argument for 0x64>"), "{text}");
}

#[test]
fn extended_arg_widens_the_following_argument() {
    let mut code = CodeObject::empty("payload.py", "<module>");
    // EXTENDED_ARG 1; JUMP_ABSOLUTE 2 -> effective target 0x10002
    code.code = vec![145, 1, 0, 113, 2, 0];
    let text = disassemble(&code);
    assert!(text.contains("EXTENDED_ARG"), "{text}");
    assert!(text.contains("to 65538"), "{text}");
}

#[test]
fn out_of_range_operand_indexes_are_flagged() {
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.code = vec![101, 9, 0]; // LOAD_NAME 9 with an empty name table
    let text = disassemble(&code);
    assert!(text.contains("<invalid index 9>"), "{text}");
}

#[test]
fn relative_jumps_show_the_resolved_target() {
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.code = vec![110, 4, 0]; // JUMP_FORWARD 4 from offset 0
    let text = disassemble(&code);
    assert!(text.contains("to 7"), "{text}");
}

#[test]
fn compare_op_names_the_comparison() {
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.code = vec![107, 2, 0]; // COMPARE_OP ==
    let text = disassemble(&code);
    assert!(text.contains("(==)"), "{text}");
}

#[test]
fn nested_code_objects_get_their_own_section() {
    let mut outer = module_code();
    let mut inner = CodeObject::empty("payload.py", "helper");
    inner.code = vec![83];
    outer.consts.push(Value::Code(Box::new(inner)));
    let text = disassemble(&outer);
    assert!(text.contains("Disassembly of <code object helper>:"), "{text}");
}

#[test]
fn summary_lists_names_constants_and_filename() {
    let text = structural_summary(&module_code());
    assert!(text.contains("CODE OBJECT ANALYSIS"), "{text}");
    assert!(text.contains("[*] Names used: 2"), "{text}");
    assert!(text.contains("- socket"), "{text}");
    assert!(text.contains("[*] Constants: 2"), "{text}");
    assert!(text.contains("[*] Original filename: payload.py"), "{text}");
}

#[test]
fn summary_elides_past_the_listing_bounds() {
    let mut code = module_code();
    code.names = (0..60).map(|i| format!("name_{i}")).collect();
    let text = structural_summary(&code);
    assert!(text.contains("[*] Names used: 60"), "{text}");
    assert!(text.contains("... 10 more"), "{text}");
    assert!(!text.contains("name_55"), "{text}");
}

#[test]
fn summary_recursion_is_depth_limited() {
    // Build a nesting chain deeper than the summary will follow.
    let mut code = CodeObject::empty("payload.py", "level_0");
    for i in 1..=12 {
        let mut outer = CodeObject::empty("payload.py", &format!("level_{i}"));
        outer.consts = vec![Value::Code(Box::new(code))];
        code = outer;
    }
    let text = structural_summary(&code);
    assert!(text.contains("Nested code objects elided (depth limit)"), "{text}");
    assert!(!text.contains("'level_0'"), "{text}");
}

#[test]
fn multibyte_constants_truncate_at_char_boundaries() {
    // A long unicode constant whose multibyte chars straddle the preview
    // bound must render a truncated preview, not split a char.
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.consts = vec![Value::Unicode("\u{20ac}".repeat(60))];
    code.code = vec![100, 0, 0, 83]; // LOAD_CONST 0; RETURN_VALUE

    let summary = structural_summary(&code);
    assert!(summary.contains("..."), "{summary}");
    let trace = disassemble(&code);
    assert!(trace.contains("LOAD_CONST"), "{trace}");

    let preview = code.consts[0].preview(100);
    assert!(preview.ends_with("..."), "{preview}");
    assert!(preview.len() <= 103);
}

#[test]
fn long_string_constants_are_previewed_not_dumped() {
    let mut code = CodeObject::empty("payload.py", "<module>");
    code.consts = vec![Value::Str(vec![b'A'; 5000])];
    let text = structural_summary(&code);
    assert!(text.len() < 2000, "summary should stay bounded, got {}", text.len());
}
