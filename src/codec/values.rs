//! Tagged, length-prefixed value codec for property records.
//!
//! Wire format: `u32 count`, then `count` pairs of
//! `(u32 name_len, name_bytes, u8 tag, payload)`. Scalars are little-endian
//! and fixed width; strings, lists, sets and maps are length-prefixed and
//! decoded recursively.
//!
//! Decoding is total: an unknown tag decodes as null, and a truncated record
//! decodes to the empty map with a warning instead of failing the read path.

use tracing::warn;

use crate::error::{KvtError, Result};
use crate::model::{Date, DateTime, PropertyMap, Time, Value};

pub const TAG_NULL: u8 = 0;
pub const TAG_BOOL: u8 = 1;
pub const TAG_INT: u8 = 2;
pub const TAG_FLOAT: u8 = 3;
pub const TAG_STRING: u8 = 4;
pub const TAG_DATE: u8 = 5;
pub const TAG_TIME: u8 = 6;
pub const TAG_DATETIME: u8 = 7;
pub const TAG_LIST: u8 = 8;
pub const TAG_SET: u8 = 9;
pub const TAG_MAP: u8 = 10;

pub fn encode_props(props: &PropertyMap) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + props.len() * 16);
    write_u32(&mut buf, props.len() as u32);
    for (name, value) in props {
        write_str(&mut buf, name);
        encode_value(value, &mut buf);
    }
    buf
}

/// Total decode: malformed input yields the empty map rather than an error,
/// so a corrupt row never takes down a scan.
pub fn decode_props(data: &[u8]) -> PropertyMap {
    match try_decode_props(data) {
        Ok(props) => props,
        Err(err) => {
            warn!(error = %err, len = data.len(), "failed to decode property record");
            PropertyMap::new()
        }
    }
}

/// Aligns positional values against their property names, zip-to-shortest.
pub fn align_props(names: &[String], values: &[Value]) -> PropertyMap {
    names
        .iter()
        .zip(values.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

pub fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(v) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*v));
        }
        Value::Int(v) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(v) => {
            buf.push(TAG_STRING);
            write_str(buf, v);
        }
        Value::Date(d) => {
            buf.push(TAG_DATE);
            buf.extend_from_slice(&d.year.to_le_bytes());
            buf.push(d.month as u8);
            buf.push(d.day as u8);
        }
        Value::Time(t) => {
            buf.push(TAG_TIME);
            buf.push(t.hour as u8);
            buf.push(t.minute as u8);
            buf.push(t.sec as u8);
            buf.extend_from_slice(&t.microsec.to_le_bytes());
        }
        Value::DateTime(dt) => {
            buf.push(TAG_DATETIME);
            buf.extend_from_slice(&dt.year.to_le_bytes());
            buf.push(dt.month as u8);
            buf.push(dt.day as u8);
            buf.push(dt.hour as u8);
            buf.push(dt.minute as u8);
            buf.push(dt.sec as u8);
            buf.extend_from_slice(&dt.microsec.to_le_bytes());
        }
        Value::List(items) => {
            buf.push(TAG_LIST);
            write_u32(buf, items.len() as u32);
            for item in items {
                encode_value(item, buf);
            }
        }
        Value::Set(items) => {
            buf.push(TAG_SET);
            write_u32(buf, items.len() as u32);
            for item in items {
                encode_value(item, buf);
            }
        }
        Value::Map(entries) => {
            buf.push(TAG_MAP);
            write_u32(buf, entries.len() as u32);
            for (key, value) in entries {
                write_str(buf, key);
                encode_value(value, buf);
            }
        }
    }
}

pub fn decode_value(data: &[u8], cursor: &mut usize) -> Result<Value> {
    let tag = read_u8(data, cursor)?;
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL => Value::Bool(read_u8(data, cursor)? != 0),
        TAG_INT => Value::Int(i64::from_le_bytes(read_array(data, cursor)?)),
        TAG_FLOAT => Value::Float(f64::from_le_bytes(read_array(data, cursor)?)),
        TAG_STRING => Value::Str(read_str(data, cursor)?),
        TAG_DATE => Value::Date(Date {
            year: i16::from_le_bytes(read_array(data, cursor)?),
            month: read_u8(data, cursor)? as i8,
            day: read_u8(data, cursor)? as i8,
        }),
        TAG_TIME => Value::Time(Time {
            hour: read_u8(data, cursor)? as i8,
            minute: read_u8(data, cursor)? as i8,
            sec: read_u8(data, cursor)? as i8,
            microsec: i32::from_le_bytes(read_array(data, cursor)?),
        }),
        TAG_DATETIME => Value::DateTime(DateTime {
            year: i16::from_le_bytes(read_array(data, cursor)?),
            month: read_u8(data, cursor)? as i8,
            day: read_u8(data, cursor)? as i8,
            hour: read_u8(data, cursor)? as i8,
            minute: read_u8(data, cursor)? as i8,
            sec: read_u8(data, cursor)? as i8,
            microsec: i32::from_le_bytes(read_array(data, cursor)?),
        }),
        TAG_LIST => {
            let len = read_u32(data, cursor)?;
            let mut items = Vec::with_capacity(len.min(1024) as usize);
            for _ in 0..len {
                items.push(decode_value(data, cursor)?);
            }
            Value::List(items)
        }
        TAG_SET => {
            let len = read_u32(data, cursor)?;
            let mut items = Vec::with_capacity(len.min(1024) as usize);
            for _ in 0..len {
                items.push(decode_value(data, cursor)?);
            }
            // Restore set canonical form: sorted, unique.
            items.sort();
            items.dedup();
            Value::Set(items)
        }
        TAG_MAP => {
            let len = read_u32(data, cursor)?;
            let mut entries = std::collections::BTreeMap::new();
            for _ in 0..len {
                let key = read_str(data, cursor)?;
                let value = decode_value(data, cursor)?;
                entries.insert(key, value);
            }
            Value::Map(entries)
        }
        other => {
            warn!(tag = other, "unknown value tag; decoding as null");
            Value::Null
        }
    };
    Ok(value)
}

fn try_decode_props(data: &[u8]) -> Result<PropertyMap> {
    let mut props = PropertyMap::new();
    if data.is_empty() {
        return Ok(props);
    }
    let mut cursor = 0usize;
    let count = read_u32(data, &mut cursor)?;
    for _ in 0..count {
        let name = read_str(data, &mut cursor)?;
        let value = decode_value(data, &mut cursor)?;
        props.insert(name, value);
    }
    Ok(props)
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn read_u8(data: &[u8], cursor: &mut usize) -> Result<u8> {
    let byte = *data
        .get(*cursor)
        .ok_or_else(|| truncated("byte", *cursor))?;
    *cursor += 1;
    Ok(byte)
}

fn read_array<const N: usize>(data: &[u8], cursor: &mut usize) -> Result<[u8; N]> {
    let end = cursor
        .checked_add(N)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| truncated("scalar", *cursor))?;
    let mut out = [0u8; N];
    out.copy_from_slice(&data[*cursor..end]);
    *cursor = end;
    Ok(out)
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(data, cursor)?))
}

fn read_str(data: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u32(data, cursor)? as usize;
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| truncated("string", *cursor))?;
    let s = std::str::from_utf8(&data[*cursor..end])
        .map_err(|_| KvtError::Corruption("stored string is not valid utf-8".into()))?
        .to_owned();
    *cursor = end;
    Ok(s)
}

fn truncated(what: &str, at: usize) -> KvtError {
    KvtError::Corruption(format!("value record truncated reading {what} at offset {at}"))
}
