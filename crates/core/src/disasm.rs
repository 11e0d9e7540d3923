//! Introspector/Disassembler for recovered code objects.
//!
//! Produces a best-effort linear instruction trace (CPython 2.7 encoding:
//! opcodes below 90 take no argument, the rest take a little-endian u16,
//! `EXTENDED_ARG` widens the next argument) and a structural summary of
//! names, constants, and nested code objects. Unknown opcodes are reported
//! per-instruction and never abort the trace; summary previews and recursion
//! depth are both bounded so adversarial nesting cannot produce unbounded
//! output.

use std::fmt::Write;

use crate::marshal::CodeObject;

/// First opcode that takes an argument.
const HAVE_ARGUMENT: u8 = 90;
const EXTENDED_ARG: u8 = 145;

/// How many names/constants the summary lists before eliding.
const MAX_NAMES_LISTED: usize = 50;
const MAX_CONSTS_LISTED: usize = 20;
/// Preview bound for constant values.
const PREVIEW_LEN: usize = 100;
/// Recursion bound for nested code objects in the summary.
const MAX_SUMMARY_DEPTH: usize = 8;

/// Render a human-readable instruction trace for `code`, recursing into
/// nested code-object constants the way reference disassemblers do.
pub fn disassemble(code: &CodeObject) -> String {
    let mut out = String::new();
    disassemble_into(code, &mut out);
    for nested in code.nested_code() {
        let _ = writeln!(out, "\nDisassembly of <code object {}>:", nested.name);
        disassemble_into(nested, &mut out);
    }
    out
}

fn disassemble_into(code: &CodeObject, out: &mut String) {
    let line_starts = decode_lnotab(code);
    let bytes = &code.code;
    let mut offset = 0usize;
    let mut extended: u32 = 0;

    while offset < bytes.len() {
        let op = bytes[offset];
        let line = line_starts
            .iter()
            .find(|(o, _)| *o == offset)
            .map(|(_, l)| l.to_string())
            .unwrap_or_default();
        let name = opcode_name(op).unwrap_or("<unknown>");

        if op < HAVE_ARGUMENT {
            let shown = if opcode_name(op).is_some() {
                name.to_string()
            } else {
                format!("<unknown 0x{op:02x}>")
            };
            let _ = writeln!(out, "{line:>4} {offset:>8} {shown}");
            offset += 1;
            extended = 0;
            continue;
        }

        if offset + 2 >= bytes.len() {
            let _ = writeln!(out, "{line:>4} {offset:>8} <truncated argument for 0x{op:02x}>");
            break;
        }
        let raw = u16::from_le_bytes([bytes[offset + 1], bytes[offset + 2]]) as u32;
        let arg = (extended << 16) | raw;

        if op == EXTENDED_ARG {
            let _ = writeln!(out, "{line:>4} {offset:>8} EXTENDED_ARG    {raw:>8}");
            extended = raw;
            offset += 3;
            continue;
        }
        extended = 0;

        let shown = if opcode_name(op).is_some() {
            format!("{name:<20}")
        } else {
            format!("{:<20}", format!("<unknown 0x{op:02x}>"))
        };
        let annotation = annotate(code, op, arg, offset);
        if annotation.is_empty() {
            let _ = writeln!(out, "{line:>4} {offset:>8} {shown} {arg:>8}");
        } else {
            let _ = writeln!(out, "{line:>4} {offset:>8} {shown} {arg:>8} ({annotation})");
        }
        offset += 3;
    }
}

/// Resolve the operand of an argument-taking opcode against the code
/// object's tables. Out-of-range indexes are reported inline rather than
/// treated as fatal; the buffer is untrusted.
fn annotate(code: &CodeObject, op: u8, arg: u32, offset: usize) -> String {
    let index = arg as usize;
    let lookup = |table: &[String]| {
        table.get(index).cloned().unwrap_or_else(|| format!("<invalid index {index}>"))
    };
    match op {
        // LOAD_CONST
        100 => match code.consts.get(index) {
            Some(value) => value.preview(PREVIEW_LEN),
            None => format!("<invalid index {index}>"),
        },
        // Name-table operands.
        90 | 91 | 95 | 96 | 97 | 98 | 101 | 106 | 108 | 109 | 116 => lookup(&code.names),
        // Local-variable operands.
        124 | 125 | 126 => lookup(&code.varnames),
        // Closure operands index cellvars then freevars.
        135 | 136 | 137 => {
            let cells = code.cellvars.len();
            if index < cells {
                lookup(&code.cellvars)
            } else {
                code.freevars
                    .get(index - cells)
                    .cloned()
                    .unwrap_or_else(|| format!("<invalid index {index}>"))
            }
        }
        // COMPARE_OP
        107 => compare_op_name(index).to_string(),
        // Relative jumps target offset + 3 + arg.
        93 | 110 | 120 | 121 | 122 | 143 => format!("to {}", offset + 3 + index),
        // Absolute jumps.
        111 | 112 | 113 | 114 | 115 | 119 => format!("to {arg}"),
        _ => String::new(),
    }
}

fn compare_op_name(index: usize) -> &'static str {
    const CMP_OPS: [&str; 12] = [
        "<", "<=", "==", "!=", ">", ">=", "in", "not in", "is", "is not", "exception match",
        "BAD",
    ];
    CMP_OPS.get(index).copied().unwrap_or("BAD")
}

/// Decode the packed line-number table into (offset, line) boundaries.
/// Best-effort: a malformed table simply yields fewer boundaries.
fn decode_lnotab(code: &CodeObject) -> Vec<(usize, u32)> {
    let mut starts = vec![(0usize, code.firstlineno)];
    let mut offset = 0usize;
    let mut line = code.firstlineno;
    for pair in code.lnotab.chunks_exact(2) {
        offset += pair[0] as usize;
        line = line.saturating_add(pair[1] as u32);
        starts.push((offset, line));
    }
    starts
}

/// Render the structural summary: counts and bounded previews of names,
/// constants, and variable names, recursing into nested code objects.
pub fn structural_summary(code: &CodeObject) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(70));
    let _ = writeln!(out, "CODE OBJECT ANALYSIS");
    let _ = writeln!(out, "{}", "=".repeat(70));
    summarize_into(code, 0, &mut out);
    out
}

fn summarize_into(code: &CodeObject, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);

    let _ = writeln!(out, "\n{indent}[*] Names used: {}", code.names.len());
    for name in code.names.iter().take(MAX_NAMES_LISTED) {
        let _ = writeln!(out, "{indent}  - {name}");
    }
    if code.names.len() > MAX_NAMES_LISTED {
        let _ = writeln!(out, "{indent}  ... {} more", code.names.len() - MAX_NAMES_LISTED);
    }

    let _ = writeln!(out, "\n{indent}[*] Constants: {}", code.consts.len());
    for (i, constant) in code.consts.iter().take(MAX_CONSTS_LISTED).enumerate() {
        let _ = writeln!(
            out,
            "{indent}  [{i}] {}: {}",
            constant.type_name(),
            constant.preview(PREVIEW_LEN)
        );
    }
    if code.consts.len() > MAX_CONSTS_LISTED {
        let _ = writeln!(out, "{indent}  ... {} more", code.consts.len() - MAX_CONSTS_LISTED);
    }

    let _ = writeln!(out, "\n{indent}[*] Variable names: ({})", code.varnames.join(", "));
    let _ = writeln!(out, "\n{indent}[*] Original filename: {}", code.filename);

    if depth >= MAX_SUMMARY_DEPTH {
        if code.nested_code().next().is_some() {
            let _ = writeln!(out, "\n{indent}[!] Nested code objects elided (depth limit)");
        }
        return;
    }
    for nested in code.nested_code() {
        let _ = writeln!(out, "\n{indent}[*] Nested code object '{}':", nested.name);
        summarize_into(nested, depth + 1, out);
    }
}

/// CPython 2.7 opcode names. `None` for undefined opcodes; the caller
/// reports those per-instruction instead of failing the trace.
fn opcode_name(op: u8) -> Option<&'static str> {
    Some(match op {
        0 => "STOP_CODE",
        1 => "POP_TOP",
        2 => "ROT_TWO",
        3 => "ROT_THREE",
        4 => "DUP_TOP",
        5 => "ROT_FOUR",
        9 => "NOP",
        10 => "UNARY_POSITIVE",
        11 => "UNARY_NEGATIVE",
        12 => "UNARY_NOT",
        13 => "UNARY_CONVERT",
        15 => "UNARY_INVERT",
        19 => "BINARY_POWER",
        20 => "BINARY_MULTIPLY",
        21 => "BINARY_DIVIDE",
        22 => "BINARY_MODULO",
        23 => "BINARY_ADD",
        24 => "BINARY_SUBTRACT",
        25 => "BINARY_SUBSCR",
        26 => "BINARY_FLOOR_DIVIDE",
        27 => "BINARY_TRUE_DIVIDE",
        28 => "INPLACE_FLOOR_DIVIDE",
        29 => "INPLACE_TRUE_DIVIDE",
        30 => "SLICE+0",
        31 => "SLICE+1",
        32 => "SLICE+2",
        33 => "SLICE+3",
        40 => "STORE_SLICE+0",
        41 => "STORE_SLICE+1",
        42 => "STORE_SLICE+2",
        43 => "STORE_SLICE+3",
        50 => "DELETE_SLICE+0",
        51 => "DELETE_SLICE+1",
        52 => "DELETE_SLICE+2",
        53 => "DELETE_SLICE+3",
        54 => "STORE_MAP",
        55 => "INPLACE_ADD",
        56 => "INPLACE_SUBTRACT",
        57 => "INPLACE_MULTIPLY",
        58 => "INPLACE_DIVIDE",
        59 => "INPLACE_MODULO",
        60 => "STORE_SUBSCR",
        61 => "DELETE_SUBSCR",
        62 => "BINARY_LSHIFT",
        63 => "BINARY_RSHIFT",
        64 => "BINARY_AND",
        65 => "BINARY_XOR",
        66 => "BINARY_OR",
        67 => "INPLACE_POWER",
        68 => "GET_ITER",
        70 => "PRINT_EXPR",
        71 => "PRINT_ITEM",
        72 => "PRINT_NEWLINE",
        73 => "PRINT_ITEM_TO",
        74 => "PRINT_NEWLINE_TO",
        75 => "INPLACE_LSHIFT",
        76 => "INPLACE_RSHIFT",
        77 => "INPLACE_AND",
        78 => "INPLACE_XOR",
        79 => "INPLACE_OR",
        80 => "BREAK_LOOP",
        81 => "WITH_CLEANUP",
        82 => "LOAD_LOCALS",
        83 => "RETURN_VALUE",
        84 => "IMPORT_STAR",
        85 => "EXEC_STMT",
        86 => "YIELD_VALUE",
        87 => "POP_BLOCK",
        88 => "END_FINALLY",
        89 => "BUILD_CLASS",
        90 => "STORE_NAME",
        91 => "DELETE_NAME",
        92 => "UNPACK_SEQUENCE",
        93 => "FOR_ITER",
        94 => "LIST_APPEND",
        95 => "STORE_ATTR",
        96 => "DELETE_ATTR",
        97 => "STORE_GLOBAL",
        98 => "DELETE_GLOBAL",
        99 => "DUP_TOPX",
        100 => "LOAD_CONST",
        101 => "LOAD_NAME",
        102 => "BUILD_TUPLE",
        103 => "BUILD_LIST",
        104 => "BUILD_SET",
        105 => "BUILD_MAP",
        106 => "LOAD_ATTR",
        107 => "COMPARE_OP",
        108 => "IMPORT_NAME",
        109 => "IMPORT_FROM",
        110 => "JUMP_FORWARD",
        111 => "JUMP_IF_FALSE_OR_POP",
        112 => "JUMP_IF_TRUE_OR_POP",
        113 => "JUMP_ABSOLUTE",
        114 => "POP_JUMP_IF_FALSE",
        115 => "POP_JUMP_IF_TRUE",
        116 => "LOAD_GLOBAL",
        119 => "CONTINUE_LOOP",
        120 => "SETUP_LOOP",
        121 => "SETUP_EXCEPT",
        122 => "SETUP_FINALLY",
        124 => "LOAD_FAST",
        125 => "STORE_FAST",
        126 => "DELETE_FAST",
        130 => "RAISE_VARARGS",
        131 => "CALL_FUNCTION",
        132 => "MAKE_FUNCTION",
        133 => "BUILD_SLICE",
        134 => "MAKE_CLOSURE",
        135 => "LOAD_CLOSURE",
        136 => "LOAD_DEREF",
        137 => "STORE_DEREF",
        140 => "CALL_FUNCTION_VAR",
        141 => "CALL_FUNCTION_KW",
        142 => "CALL_FUNCTION_VAR_KW",
        143 => "SETUP_WITH",
        145 => "EXTENDED_ARG",
        146 => "SET_ADD",
        147 => "MAP_ADD",
        _ => return None,
    })
}
