//! Storage representation of runtime values
//!
//! A value's storage is the byte image written into its heap block. The kind
//! tag lives in the block header, so the payload of a string is exactly its
//! UTF-8 bytes and `"hello world"` occupies 11 bytes.
//!
//! ```text
//! null     (empty)
//! bool     u8
//! int      i64 LE
//! float    f64 LE
//! string   UTF-8 bytes
//! range    start i64 LE | end i64 LE
//! array    count u32 | (tag u8 | len u32 | payload)*
//! object   count u32 | (key_len u32 | key | tag u8 | len u32 | payload)*   keys sorted
//! ```
//!
//! Locks and atomic integers are host resources without a storage boundary
//! and are rejected with [`Error::UnsupportedType`].

use crate::error::{Error, Result};
use crate::runtime::{Value, ValueKind};

/// Serializes a value into its storage representation
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_payload(value, &mut out)?;
    Ok(out)
}

/// Storage size of a value in bytes
pub fn storage_size(value: &Value) -> Result<usize> {
    encode(value).map(|bytes| bytes.len())
}

/// Rebuilds a value from its kind tag and storage bytes.
///
/// Returns a description of the damage when the bytes are not a valid image
/// of `kind`, which callers report as a corrupted-storage fault.
pub fn decode(kind: ValueKind, bytes: &[u8]) -> std::result::Result<Value, String> {
    let mut reader = Reader { bytes, pos: 0 };
    let value = reader.payload(kind, bytes.len())?;
    if reader.pos != bytes.len() {
        return Err(format!(
            "{} trailing bytes after {} payload",
            bytes.len() - reader.pos,
            kind
        ));
    }
    Ok(value)
}

fn write_payload(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(u8::from(*b)),
        Value::Int(n) => out.extend_from_slice(&n.to_le_bytes()),
        Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Range { start, end } => {
            out.extend_from_slice(&start.to_le_bytes());
            out.extend_from_slice(&end.to_le_bytes());
        }
        Value::Array(items) => {
            out.extend_from_slice(&len_u32(items.len())?.to_le_bytes());
            for item in items.iter() {
                write_element(item, out)?;
            }
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.extend_from_slice(&len_u32(keys.len())?.to_le_bytes());
            for key in keys {
                out.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
                out.extend_from_slice(key.as_bytes());
                write_element(&fields[key], out)?;
            }
        }
        Value::Lock { .. } | Value::AtomicInteger { .. } => {
            return Err(Error::UnsupportedType {
                type_name: value.type_name(),
            })
        }
    }
    Ok(())
}

fn write_element(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    out.push(value.kind().tag());
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    let start = out.len();
    write_payload(value, out)?;
    let len = len_u32(out.len() - start)?;
    out[len_at..start].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::OutOfMemory(u32::MAX as usize))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                format!(
                    "need {} bytes at offset {}, only {} available",
                    n,
                    self.pos,
                    self.bytes.len() - self.pos
                )
            })?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> std::result::Result<[u8; N], String> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> std::result::Result<usize, String> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn i64(&mut self) -> std::result::Result<i64, String> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn payload(&mut self, kind: ValueKind, len: usize) -> std::result::Result<Value, String> {
        let start = self.pos;
        let value = match kind {
            ValueKind::Null => Value::Null,
            ValueKind::Bool => match self.take(1)?[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(format!("invalid bool byte {:#04x}", other)),
            },
            ValueKind::Int => Value::Int(self.i64()?),
            ValueKind::Float => Value::Float(f64::from_le_bytes(self.array()?)),
            ValueKind::String => {
                let raw = self.take(len)?;
                let s = std::str::from_utf8(raw).map_err(|e| format!("invalid UTF-8: {}", e))?;
                Value::String(s.to_string())
            }
            ValueKind::Range => {
                let start = self.i64()?;
                let end = self.i64()?;
                Value::Range { start, end }
            }
            ValueKind::Array => {
                let count = self.u32()?;
                let mut items = Vec::with_capacity(count.min(self.bytes.len()));
                for _ in 0..count {
                    items.push(self.element()?);
                }
                Value::array(items)
            }
            ValueKind::Object => {
                let count = self.u32()?;
                let mut fields = std::collections::HashMap::new();
                for _ in 0..count {
                    let key_len = self.u32()?;
                    let key = std::str::from_utf8(self.take(key_len)?)
                        .map_err(|e| format!("invalid UTF-8 in key: {}", e))?
                        .to_string();
                    let value = self.element()?;
                    fields.insert(key, value);
                }
                Value::object(fields)
            }
            ValueKind::Lock | ValueKind::AtomicInteger => {
                return Err(format!("{} has no storage representation", kind))
            }
        };
        if self.pos - start != len {
            return Err(format!(
                "{} payload declared {} bytes, decoded {}",
                kind,
                len,
                self.pos - start
            ));
        }
        Ok(value)
    }

    fn element(&mut self) -> std::result::Result<Value, String> {
        let tag = self.take(1)?[0];
        let kind = ValueKind::from_tag(tag).ok_or_else(|| format!("unknown tag {:#04x}", tag))?;
        let len = self.u32()?;
        self.payload(kind, len)
    }
}
