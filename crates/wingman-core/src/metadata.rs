//! Model metadata extraction, run against a completed download before it's
//! persisted into `DownloadItem.metadata`.
//!
//! `MetadataExtractor` is a seam so the default GGUF-header reader can be
//! swapped in tests; the default implementation is a best-effort parse of
//! the GGUF key-value header, not a full tensor-layout reader.

use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const GGUF_MAGIC: [u8; 4] = *b"GGUF";

pub trait MetadataExtractor: Send + Sync {
    /// Returns `None` if metadata couldn't be extracted; this is always a
    /// best-effort operation and never fails the download itself.
    fn extract(&self, path: &Path) -> Option<String>;
}

pub struct GgufMetadataExtractor;

impl MetadataExtractor for GgufMetadataExtractor {
    fn extract(&self, path: &Path) -> Option<String> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let metadata = read_gguf_header(&mut reader)?;
        serde_json::to_string(&metadata).ok()
    }
}

fn read_gguf_header<R: Read>(reader: &mut R) -> Option<Map<String, Value>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).ok()?;
    if magic != GGUF_MAGIC {
        return None;
    }

    let version = read_u32(reader)?;
    if version < 2 {
        // Pre-v2 GGUF used 32-bit counts; not worth special-casing here.
        return None;
    }

    let _tensor_count = read_u64(reader)?;
    let kv_count = read_u64(reader)?;

    let mut result = Map::new();
    for _ in 0..kv_count.min(256) {
        let Some(key) = read_gguf_string(reader) else { break };
        let Some(value) = read_gguf_value(reader) else { break };
        result.insert(key, value);
    }
    Some(result)
}

fn read_gguf_value<R: Read>(reader: &mut R) -> Option<Value> {
    let value_type = read_u32(reader)?;
    read_gguf_typed_value(reader, value_type)
}

fn read_gguf_typed_value<R: Read>(reader: &mut R, value_type: u32) -> Option<Value> {
    match value_type {
        0 => Some(Value::from(read_u8(reader)?)),
        1 => Some(Value::from(read_u8(reader)? as i8)),
        2 => Some(Value::from(read_u16(reader)?)),
        3 => Some(Value::from(read_u16(reader)? as i16)),
        4 => Some(Value::from(read_u32(reader)?)),
        5 => Some(Value::from(read_u32(reader)? as i32)),
        6 => Some(Value::from(read_f32(reader)?)),
        7 => Some(Value::from(read_u8(reader)? != 0)),
        8 => read_gguf_string(reader).map(Value::from),
        9 => {
            let element_type = read_u32(reader)?;
            let count = read_u64(reader)?;
            let mut items = Vec::with_capacity(count.min(64) as usize);
            for i in 0..count {
                let value = read_gguf_typed_value(reader, element_type)?;
                if i < 64 {
                    items.push(value);
                }
            }
            Some(Value::Array(items))
        }
        10 => Some(Value::from(read_u64(reader)?)),
        11 => Some(Value::from(read_u64(reader)? as i64)),
        12 => Some(Value::from(read_f64(reader)?)),
        _ => None,
    }
}

fn read_gguf_string<R: Read>(reader: &mut R) -> Option<String> {
    let len = read_u64(reader)?;
    if len > 1024 * 1024 {
        return None;
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

fn read_u8<R: Read>(reader: &mut R) -> Option<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).ok()?;
    Some(buf[0])
}

fn read_u16<R: Read>(reader: &mut R) -> Option<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).ok()?;
    Some(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Option<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).ok()?;
    Some(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Option<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).ok()?;
    Some(u64::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R) -> Option<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).ok()?;
    Some(f32::from_le_bytes(buf))
}

fn read_f64<R: Read>(reader: &mut R) -> Option<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).ok()?;
    Some(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_gguf_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    #[test]
    fn test_read_minimal_header() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC);
        buf.extend_from_slice(&3u32.to_le_bytes()); // version
        buf.extend_from_slice(&0u64.to_le_bytes()); // tensor_count
        buf.extend_from_slice(&1u64.to_le_bytes()); // kv_count

        write_gguf_string(&mut buf, "general.architecture");
        buf.extend_from_slice(&8u32.to_le_bytes()); // type: string
        write_gguf_string(&mut buf, "llama");

        let mut cursor = Cursor::new(buf);
        let metadata = read_gguf_header(&mut cursor).unwrap();
        assert_eq!(metadata.get("general.architecture").unwrap(), "llama");
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut cursor = Cursor::new(vec![0u8; 16]);
        assert!(read_gguf_header(&mut cursor).is_none());
    }

    #[test]
    fn test_extractor_returns_none_for_missing_file() {
        let extractor = GgufMetadataExtractor;
        assert!(extractor.extract(Path::new("/nonexistent/path.gguf")).is_none());
    }
}
