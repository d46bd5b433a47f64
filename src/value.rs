//! Strongly typed attribute values

use std::fmt;

use crate::parse::header::{DataType, DatatypeClass};
use crate::parse::le_uint;

/// The decoded contents of one attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    /// A fixed-length string, still in its stored encoding
    Bytes(Vec<u8>),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// A single-precision float, shown with the digits it was stored with
    Float32(f32),
    Bool(bool),
    /// Any value with more than one element
    Array(Vec<Value>),
    /// Data of a class that is shown but never interpreted
    Opaque(Vec<u8>),
}

impl Value {
    /// Decode a byte string as UTF-8 text
    ///
    /// Text is returned as-is. Everything else, including byte strings that are not valid UTF-8,
    /// comes back unmodified in the `Err` variant.
    pub fn try_decode(self) -> Result<String, Value> {
        match self {
            Value::Text(text) => Ok(text),
            Value::Bytes(bytes) => String::from_utf8(bytes).map_err(|e| Value::Bytes(e.into_bytes())),
            other => Err(other),
        }
    }

    /// Apply [`Value::try_decode`], keeping the original value when it fails
    pub fn decoded(self) -> Value {
        match self {
            Value::Array(values) => Value::Array(values.into_iter().map(Value::decoded).collect()),
            value => match value.try_decode() {
                Ok(text) => Value::Text(text),
                Err(value) => value,
            },
        }
    }

    /// Whether the rendered value contains `needle`
    pub fn contains_text(&self, needle: &str) -> bool {
        match self {
            Value::Text(text) => text.contains(needle),
            other => other.to_string().contains(needle),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Text(text) => f.write_str(text),
            Value::Bytes(bytes) => {
                f.write_str("b'")?;
                for byte in bytes {
                    match byte {
                        b'\\' => f.write_str("\\\\")?,
                        b'\'' => f.write_str("\\'")?,
                        b'\t' => f.write_str("\\t")?,
                        b'\n' => f.write_str("\\n")?,
                        b'\r' => f.write_str("\\r")?,
                        0x20..=0x7e => write!(f, "{}", *byte as char)?,
                        _ => write!(f, "\\x{:02x}", byte)?,
                    }
                }
                f.write_str("'")
            }
            Value::Int(n) => write!(f, "{}", n),
            Value::UInt(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Float32(x) => write!(f, "{:?}", x),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("]")
            }
            Value::Opaque(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

pub(crate) fn integer(bytes: &[u8], signed: bool, big_endian: bool) -> Value {
    if bytes.len() > 8 {
        return Value::Opaque(bytes.to_vec());
    }
    let unsigned = if big_endian {
        bytes
            .iter()
            .fold(0, |acc, byte| (acc << 8) | u64::from(*byte))
    } else {
        le_uint(bytes)
    };
    if !signed {
        return Value::UInt(unsigned);
    }
    let unused_bits = 64 - 8 * bytes.len() as u32;
    if unused_bits == 0 || unused_bits == 64 {
        Value::Int(unsigned as i64)
    } else {
        // Sign-extend from the stored width
        Value::Int(((unsigned << unused_bits) as i64) >> unused_bits)
    }
}

pub(crate) fn float(bytes: &[u8], big_endian: bool) -> Value {
    if let Ok(bytes) = <[u8; 4]>::try_from(bytes) {
        let x = if big_endian {
            f32::from_be_bytes(bytes)
        } else {
            f32::from_le_bytes(bytes)
        };
        Value::Float32(x)
    } else if let Ok(bytes) = <[u8; 8]>::try_from(bytes) {
        Value::Float(if big_endian {
            f64::from_be_bytes(bytes)
        } else {
            f64::from_le_bytes(bytes)
        })
    } else {
        Value::Opaque(bytes.to_vec())
    }
}

/// Strip string padding: 0 is null-terminated, 1 null-padded, 2 space-padded
pub(crate) fn unpad(bytes: &[u8], padding: u8) -> Vec<u8> {
    let end = match padding {
        0 => bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len()),
        1 => bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1),
        2 => bytes.iter().rposition(|b| *b != b' ').map_or(0, |i| i + 1),
        _ => bytes.len(),
    };
    bytes[..end].to_vec()
}

/// h5py stores booleans as an enumeration with exactly the members FALSE and TRUE
fn is_boolean(members: &[(String, Vec<u8>)]) -> bool {
    let mut names = members.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
    names.sort_unstable();
    names == ["FALSE", "TRUE"]
}

pub(crate) fn enumeration(base: &DataType, members: &[(String, Vec<u8>)], bytes: &[u8]) -> Value {
    if is_boolean(members) {
        if let Some((name, _)) = members.iter().find(|(_, value)| value.as_slice() == bytes) {
            return Value::Bool(name == "TRUE");
        }
    }
    match base.class {
        DatatypeClass::FixedPoint { signed, big_endian } => integer(bytes, signed, big_endian),
        _ => Value::Opaque(bytes.to_vec()),
    }
}
