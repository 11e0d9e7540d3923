//! Bytecode Loader: marshal (de)serialization of code objects.
//!
//! This is the trust boundary of the pipeline. The input buffer is
//! attacker-controlled and the format is offset-based rather than
//! self-describing-and-bounded, so every length field is validated against
//! the remaining input before allocation and recursion depth is capped.
//! Malformed or adversarial buffers fail with [`MarshalError`]; they must
//! never panic, allocate unboundedly, or execute anything.
//!
//! The reader targets the CPython 2.7 marshal layout (the format this
//! obfuscation family serializes with). A writer for the same subset is
//! included so fixtures and round-trip tests can be built without an
//! interpreter; it is not part of the recovery path itself.

mod value;

pub use value::{CodeObject, Value};

use thiserror::Error;

/// Maximum nesting depth accepted by the reader.
pub const MAX_DEPTH: usize = 64;

/// Marshal type codes (CPython 2.7 subset).
const TYPE_NULL: u8 = b'0';
const TYPE_NONE: u8 = b'N';
const TYPE_FALSE: u8 = b'F';
const TYPE_TRUE: u8 = b'T';
const TYPE_INT: u8 = b'i';
const TYPE_INT64: u8 = b'I';
const TYPE_LONG: u8 = b'l';
const TYPE_FLOAT_BIN: u8 = b'g';
const TYPE_STRING: u8 = b's';
const TYPE_INTERNED: u8 = b't';
const TYPE_STRINGREF: u8 = b'R';
const TYPE_UNICODE: u8 = b'u';
const TYPE_TUPLE: u8 = b'(';
const TYPE_LIST: u8 = b'[';
const TYPE_DICT: u8 = b'{';
const TYPE_CODE: u8 = b'c';

/// Deserialization failure. Every variant carries enough position detail to
/// diagnose where a hostile or corrupt buffer went wrong.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("truncated input at offset {offset}")]
    Truncated { offset: usize },

    #[error("unknown type code 0x{code:02x} at offset {offset}")]
    UnknownType { code: u8, offset: usize },

    #[error("length {len} at offset {offset} exceeds remaining input")]
    LengthOutOfBounds { len: u64, offset: usize },

    #[error("nesting depth exceeds {MAX_DEPTH}")]
    DepthExceeded,

    #[error("integer literal at offset {offset} does not fit in 64 bits")]
    LongOverflow { offset: usize },

    #[error("invalid UTF-8 in unicode string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("string back-reference {index} out of range at offset {offset}")]
    BadStringRef { index: u32, offset: usize },

    #[error("code object field `{field}` has unexpected type")]
    BadCodeField { field: &'static str },

    #[error("top-level value is {actual}, not a code object")]
    NotACodeObject { actual: &'static str },
}

/// Convenience result type for marshal operations.
pub type MarshalResult<T> = Result<T, MarshalError>;

/// Deserialize one value from `data`.
///
/// Trailing bytes after the first complete value are ignored, matching the
/// reference implementation's behavior.
pub fn loads(data: &[u8]) -> MarshalResult<Value> {
    Reader::new(data).read_value(0)
}

/// Deserialize `data` and require the result to be a code object.
///
/// This doubles as the chain resolver's validation oracle: a candidate chain
/// is accepted only when its output type-checks as a code object, not merely
/// when it parses as *some* value.
pub fn loads_code(data: &[u8]) -> MarshalResult<CodeObject> {
    match loads(data)? {
        Value::Code(code) => Ok(*code),
        other => Err(MarshalError::NotACodeObject { actual: other.type_name() }),
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Interned strings seen so far, for `R` back-references.
    interned: Vec<Vec<u8>>,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, interned: Vec::new() }
    }

    fn read_u8(&mut self) -> MarshalResult<u8> {
        let byte =
            *self.data.get(self.pos).ok_or(MarshalError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> MarshalResult<&'a [u8]> {
        if len > self.data.len() - self.pos {
            return Err(MarshalError::LengthOutOfBounds { len: len as u64, offset: self.pos });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> MarshalResult<u32> {
        let bytes: [u8; 4] = self.read_bytes(4)?.try_into().expect("4-byte slice");
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_i32(&mut self) -> MarshalResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a length-prefixed byte run, bounds-checked before any allocation.
    fn read_sized(&mut self) -> MarshalResult<&'a [u8]> {
        let offset = self.pos;
        let len = self.read_u32()? as u64;
        if len > (self.data.len() - self.pos) as u64 {
            return Err(MarshalError::LengthOutOfBounds { len, offset });
        }
        self.read_bytes(len as usize)
    }

    /// Read an element count for a container. Each element needs at least one
    /// byte of input, so a count beyond the remaining input is hostile.
    fn read_count(&mut self) -> MarshalResult<usize> {
        let offset = self.pos;
        let count = self.read_u32()? as u64;
        if count > (self.data.len() - self.pos) as u64 {
            return Err(MarshalError::LengthOutOfBounds { len: count, offset });
        }
        Ok(count as usize)
    }

    fn read_value(&mut self, depth: usize) -> MarshalResult<Value> {
        if depth >= MAX_DEPTH {
            return Err(MarshalError::DepthExceeded);
        }
        let offset = self.pos;
        let code = self.read_u8()?;
        match code {
            TYPE_NONE => Ok(Value::None),
            TYPE_TRUE => Ok(Value::Bool(true)),
            TYPE_FALSE => Ok(Value::Bool(false)),
            TYPE_INT => Ok(Value::Int(self.read_i32()? as i64)),
            TYPE_INT64 => {
                let bytes: [u8; 8] = self.read_bytes(8)?.try_into().expect("8-byte slice");
                Ok(Value::Int(i64::from_le_bytes(bytes)))
            }
            TYPE_LONG => self.read_long(offset),
            TYPE_FLOAT_BIN => {
                let bytes: [u8; 8] = self.read_bytes(8)?.try_into().expect("8-byte slice");
                Ok(Value::Float(f64::from_le_bytes(bytes)))
            }
            TYPE_STRING => Ok(Value::Str(self.read_sized()?.to_vec())),
            TYPE_INTERNED => {
                let bytes = self.read_sized()?.to_vec();
                self.interned.push(bytes.clone());
                Ok(Value::Str(bytes))
            }
            TYPE_STRINGREF => {
                let index = self.read_u32()?;
                let bytes = self
                    .interned
                    .get(index as usize)
                    .ok_or(MarshalError::BadStringRef { index, offset })?;
                Ok(Value::Str(bytes.clone()))
            }
            TYPE_UNICODE => {
                let bytes = self.read_sized()?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| MarshalError::InvalidUtf8 { offset })?;
                Ok(Value::Unicode(text.to_string()))
            }
            TYPE_TUPLE => {
                let count = self.read_count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value(depth + 1)?);
                }
                Ok(Value::Tuple(items))
            }
            TYPE_LIST => {
                let count = self.read_count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value(depth + 1)?);
                }
                Ok(Value::List(items))
            }
            TYPE_DICT => {
                // Key/value pairs terminated by a NULL key.
                let mut pairs = Vec::new();
                loop {
                    if self.data.get(self.pos) == Some(&TYPE_NULL) {
                        self.pos += 1;
                        break;
                    }
                    let key = self.read_value(depth + 1)?;
                    let val = self.read_value(depth + 1)?;
                    pairs.push((key, val));
                }
                Ok(Value::Dict(pairs))
            }
            TYPE_CODE => self.read_code(depth).map(|c| Value::Code(Box::new(c))),
            other => Err(MarshalError::UnknownType { code: other, offset }),
        }
    }

    /// Arbitrary-precision integer: an i32 digit count (sign carries the
    /// value's sign) followed by 15-bit little-endian digits. Values beyond
    /// i64 are rejected rather than silently truncated.
    fn read_long(&mut self, offset: usize) -> MarshalResult<Value> {
        let ndigits_signed = self.read_i32()?;
        let negative = ndigits_signed < 0;
        let ndigits = ndigits_signed.unsigned_abs() as u64;
        if ndigits * 2 > (self.data.len() - self.pos) as u64 {
            return Err(MarshalError::LengthOutOfBounds { len: ndigits * 2, offset });
        }
        // 5 15-bit digits cover every i64; anything wider is rejected rather
        // than silently truncated.
        if ndigits > 5 {
            return Err(MarshalError::LongOverflow { offset });
        }
        let mut value: i128 = 0;
        for i in 0..ndigits {
            let bytes: [u8; 2] = self.read_bytes(2)?.try_into().expect("2-byte slice");
            let digit = u16::from_le_bytes(bytes) as i128;
            value += digit << (15 * i as u32);
        }
        if negative {
            value = -value;
        }
        i64::try_from(value)
            .map(Value::Int)
            .map_err(|_| MarshalError::LongOverflow { offset })
    }

    fn read_code(&mut self, depth: usize) -> MarshalResult<CodeObject> {
        let argcount = self.read_u32()?;
        let nlocals = self.read_u32()?;
        let stacksize = self.read_u32()?;
        let flags = self.read_u32()?;
        let code = self.expect_bytes(depth, "code")?;
        let consts = self.expect_tuple(depth, "consts")?;
        let names = self.expect_str_tuple(depth, "names")?;
        let varnames = self.expect_str_tuple(depth, "varnames")?;
        let freevars = self.expect_str_tuple(depth, "freevars")?;
        let cellvars = self.expect_str_tuple(depth, "cellvars")?;
        let filename = self.expect_str(depth, "filename")?;
        let name = self.expect_str(depth, "name")?;
        let firstlineno = self.read_u32()?;
        let lnotab = self.expect_bytes(depth, "lnotab")?;

        Ok(CodeObject {
            argcount,
            nlocals,
            stacksize,
            flags,
            code,
            consts,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            firstlineno,
            lnotab,
        })
    }

    fn expect_bytes(&mut self, depth: usize, field: &'static str) -> MarshalResult<Vec<u8>> {
        match self.read_value(depth + 1)? {
            Value::Str(bytes) => Ok(bytes),
            _ => Err(MarshalError::BadCodeField { field }),
        }
    }

    fn expect_tuple(&mut self, depth: usize, field: &'static str) -> MarshalResult<Vec<Value>> {
        match self.read_value(depth + 1)? {
            Value::Tuple(items) => Ok(items),
            _ => Err(MarshalError::BadCodeField { field }),
        }
    }

    fn expect_str(&mut self, depth: usize, field: &'static str) -> MarshalResult<String> {
        match self.read_value(depth + 1)? {
            Value::Str(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Value::Unicode(text) => Ok(text),
            _ => Err(MarshalError::BadCodeField { field }),
        }
    }

    fn expect_str_tuple(
        &mut self,
        depth: usize,
        field: &'static str,
    ) -> MarshalResult<Vec<String>> {
        let items = self.expect_tuple(depth, field)?;
        items
            .into_iter()
            .map(|item| match item {
                Value::Str(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Value::Unicode(text) => Ok(text),
                _ => Err(MarshalError::BadCodeField { field }),
            })
            .collect()
    }
}

/// Serialize a value in the same subset the reader accepts.
///
/// Fixture tooling: lets tests and demo inputs build obfuscated samples
/// without an interpreter. Strings are always written as plain (non-interned)
/// entries.
pub fn dumps(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

/// Serialize a code object (the usual top-level value of a payload).
pub fn dumps_code(code: &CodeObject) -> Vec<u8> {
    dumps(&Value::Code(Box::new(code.clone())))
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::None => out.push(TYPE_NONE),
        Value::Bool(true) => out.push(TYPE_TRUE),
        Value::Bool(false) => out.push(TYPE_FALSE),
        Value::Int(n) => {
            if let Ok(small) = i32::try_from(*n) {
                out.push(TYPE_INT);
                out.extend_from_slice(&small.to_le_bytes());
            } else {
                out.push(TYPE_INT64);
                out.extend_from_slice(&n.to_le_bytes());
            }
        }
        Value::Float(x) => {
            out.push(TYPE_FLOAT_BIN);
            out.extend_from_slice(&x.to_le_bytes());
        }
        Value::Str(bytes) => write_sized(TYPE_STRING, bytes, out),
        Value::Unicode(text) => write_sized(TYPE_UNICODE, text.as_bytes(), out),
        Value::Tuple(items) => {
            out.push(TYPE_TUPLE);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_value(item, out);
            }
        }
        Value::List(items) => {
            out.push(TYPE_LIST);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_value(item, out);
            }
        }
        Value::Dict(pairs) => {
            out.push(TYPE_DICT);
            for (key, val) in pairs {
                write_value(key, out);
                write_value(val, out);
            }
            out.push(TYPE_NULL);
        }
        Value::Code(code) => write_code(code, out),
    }
}

fn write_sized(code: u8, bytes: &[u8], out: &mut Vec<u8>) {
    out.push(code);
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn write_str_tuple(names: &[String], out: &mut Vec<u8>) {
    out.push(TYPE_TUPLE);
    out.extend_from_slice(&(names.len() as u32).to_le_bytes());
    for name in names {
        write_sized(TYPE_STRING, name.as_bytes(), out);
    }
}

fn write_code(code: &CodeObject, out: &mut Vec<u8>) {
    out.push(TYPE_CODE);
    out.extend_from_slice(&code.argcount.to_le_bytes());
    out.extend_from_slice(&code.nlocals.to_le_bytes());
    out.extend_from_slice(&code.stacksize.to_le_bytes());
    out.extend_from_slice(&code.flags.to_le_bytes());
    write_sized(TYPE_STRING, &code.code, out);
    out.push(TYPE_TUPLE);
    out.extend_from_slice(&(code.consts.len() as u32).to_le_bytes());
    for constant in &code.consts {
        write_value(constant, out);
    }
    write_str_tuple(&code.names, out);
    write_str_tuple(&code.varnames, out);
    write_str_tuple(&code.freevars, out);
    write_str_tuple(&code.cellvars, out);
    write_sized(TYPE_STRING, code.filename.as_bytes(), out);
    write_sized(TYPE_STRING, code.name.as_bytes(), out);
    out.extend_from_slice(&code.firstlineno.to_le_bytes());
    write_sized(TYPE_STRING, &code.lnotab, out);
}
