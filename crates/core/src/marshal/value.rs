//! Deserialized value model.
//!
//! A recovered program unit is a tree of owned values: any constant of a
//! [`CodeObject`] may itself be a nested code object. Ownership is strictly
//! tree-shaped; the format we parse has no back references between code
//! objects, so no cycles can occur.

/// A deserialized marshal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A byte string (marshal `str`); not guaranteed to be UTF-8.
    Str(Vec<u8>),
    /// A unicode string.
    Unicode(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    /// Key/value pairs in encounter order.
    Dict(Vec<(Value, Value)>),
    /// A nested program unit. Boxed: code objects dominate the tree's size.
    Code(Box<CodeObject>),
}

impl Value {
    /// Short type label used in summaries, mirroring the names an analyst
    /// expects from the source ecosystem.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Unicode(_) => "unicode",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Code(_) => "code",
        }
    }

    /// Render a bounded, single-line preview of this value.
    ///
    /// Output is truncated to `max_len` characters; nested containers render
    /// their elements' previews recursively but the overall bound still
    /// applies, so adversarial nesting cannot blow up summary output.
    pub fn preview(&self, max_len: usize) -> String {
        let mut out = String::new();
        self.render(&mut out, max_len);
        if out.len() > max_len {
            // Unicode constants can put a multibyte char across the cut.
            let mut cut = max_len;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("...");
        }
        out
    }

    fn render(&self, out: &mut String, budget: usize) {
        if out.len() > budget {
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::Float(x) => out.push_str(&x.to_string()),
            Value::Str(bytes) => {
                out.push('\'');
                out.push_str(&printable(bytes));
                out.push('\'');
            }
            Value::Unicode(s) => {
                out.push_str("u'");
                out.push_str(&s.replace(['\n', '\r'], " "));
                out.push('\'');
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render(out, budget);
                    if out.len() > budget {
                        return;
                    }
                }
                out.push(')');
            }
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render(out, budget);
                    if out.len() > budget {
                        return;
                    }
                }
                out.push(']');
            }
            Value::Dict(pairs) => {
                out.push('{');
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.render(out, budget);
                    out.push_str(": ");
                    v.render(out, budget);
                    if out.len() > budget {
                        return;
                    }
                }
                out.push('}');
            }
            Value::Code(code) => {
                out.push_str("<code object ");
                out.push_str(&code.name);
                out.push('>');
            }
        }
    }
}

/// Render bytes as printable ASCII, escaping everything else.
fn printable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b' '..=b'~' if b != b'\'' && b != b'\\' => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

/// A structured, serializable representation of a compiled program unit.
///
/// Field names follow the serialized format's own vocabulary so recovered
/// artifacts read naturally next to reference disassembly.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    pub argcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: u32,
    /// Raw instruction bytes.
    pub code: Vec<u8>,
    /// Constant pool; entries may be nested `Value::Code` forming a tree.
    pub consts: Vec<Value>,
    /// Referenced global/attribute names, in index order.
    pub names: Vec<String>,
    /// Local variable names, in index order.
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    /// Declared originating filename.
    pub filename: String,
    /// Unit name (function/module name).
    pub name: String,
    pub firstlineno: u32,
    /// Packed line-number table (pairs of byte-delta, line-delta).
    pub lnotab: Vec<u8>,
}

impl CodeObject {
    /// An empty module-level code object, useful as a fixture baseline.
    pub fn empty(filename: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            argcount: 0,
            nlocals: 0,
            stacksize: 0,
            flags: 0,
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            filename: filename.into(),
            name: name.into(),
            firstlineno: 1,
            lnotab: Vec::new(),
        }
    }

    /// Iterate nested code objects one level down (code-typed constants).
    pub fn nested_code(&self) -> impl Iterator<Item = &CodeObject> {
        self.consts.iter().filter_map(|c| match c {
            Value::Code(inner) => Some(inner.as_ref()),
            _ => None,
        })
    }
}
