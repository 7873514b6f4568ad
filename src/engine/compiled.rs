//! Compiled fast-path decoder
//!
//! The writer schema is compiled once into a [`Plan`] tree and payloads are
//! decoded straight from the byte slice, without apache-avro's per-datum schema
//! walk and name resolution. Logical types and named references are not
//! compiled; those schemas stay on the reference path.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::Schema;

use super::{DatumDecoder, FastDecoderEngine};

/// apache-avro's default decode allocation limit, used when none was configured
const DEFAULT_MAX_ALLOCATION_BYTES: usize = 512 * 1024 * 1024;

/// The built-in fast engine
#[derive(Debug, Clone, Copy, Default)]
pub struct CompiledEngine;

impl FastDecoderEngine for CompiledEngine {
    fn name(&self) -> &'static str {
        "compiled"
    }

    fn bind(
        &self,
        writer: &Arc<Schema>,
        reader: Option<&Arc<Schema>>,
    ) -> Result<Arc<dyn DatumDecoder>, String> {
        let plan = Plan::compile(writer)?;
        // Identical reader and writer need no resolution pass
        let reader = reader
            .filter(|reader| reader.canonical_form() != writer.canonical_form())
            .cloned();
        Ok(Arc::new(PlanDecoder { plan, reader }))
    }
}

/// Decode instructions for one schema node
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Fixed(usize),
    Enum(Vec<String>),
    Array(Box<Plan>),
    Map(Box<Plan>),
    Union(Vec<Plan>),
    Record(Vec<(String, Plan)>),
}

impl Plan {
    fn compile(schema: &Schema) -> Result<Plan, String> {
        Ok(match schema {
            Schema::Null => Plan::Null,
            Schema::Boolean => Plan::Boolean,
            Schema::Int => Plan::Int,
            Schema::Long => Plan::Long,
            Schema::Float => Plan::Float,
            Schema::Double => Plan::Double,
            Schema::Bytes => Plan::Bytes,
            Schema::String => Plan::String,
            Schema::Fixed(fixed) => Plan::Fixed(fixed.size),
            Schema::Enum(enum_schema) => Plan::Enum(enum_schema.symbols.clone()),
            Schema::Array(items) => Plan::Array(Box::new(Plan::compile(items)?)),
            Schema::Map(values) => Plan::Map(Box::new(Plan::compile(values)?)),
            Schema::Union(union) => Plan::Union(
                union
                    .variants()
                    .iter()
                    .map(Plan::compile)
                    .collect::<Result<_, _>>()?,
            ),
            Schema::Record(record) => Plan::Record(
                record
                    .fields
                    .iter()
                    .map(|field| -> Result<(String, Plan), String> {
                        Ok((field.name.clone(), Plan::compile(&field.schema)?))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(format!(
                    "unsupported schema for compiled decoding: {}",
                    serde_json::to_string(other).unwrap_or_default()
                ))
            }
        })
    }

    /// Fewest bytes one datum of this plan can occupy
    fn min_width(&self) -> usize {
        match self {
            Plan::Null => 0,
            Plan::Float => 4,
            Plan::Double => 8,
            Plan::Fixed(size) => *size,
            Plan::Record(fields) => fields.iter().map(|(_, field)| field.min_width()).sum(),
            _ => 1,
        }
    }
}

struct PlanDecoder {
    plan: Plan,
    reader: Option<Arc<Schema>>,
}

impl DatumDecoder for PlanDecoder {
    fn decode(&self, payload: &mut Cursor<&[u8]>) -> Result<Value, String> {
        let buf: &[u8] = *payload.get_ref();
        let start = usize::try_from(payload.position()).map_err(|e| e.to_string())?;
        let mut slice = SliceReader { buf, pos: start };

        let value = slice.read(&self.plan)?;
        payload.set_position(slice.pos as u64);

        match &self.reader {
            Some(reader) => value.resolve(reader).map_err(|e| e.to_string()),
            None => Ok(value),
        }
    }
}

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn read(&mut self, plan: &Plan) -> Result<Value, String> {
        Ok(match plan {
            Plan::Null => Value::Null,
            Plan::Boolean => match self.take(1)?[0] {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => return Err(format!("invalid boolean byte {:#04x}", other)),
            },
            Plan::Int => Value::Int(self.read_int()?),
            Plan::Long => Value::Long(self.read_long()?),
            Plan::Float => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(self.take(4)?);
                Value::Float(f32::from_le_bytes(raw))
            }
            Plan::Double => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8)?);
                Value::Double(f64::from_le_bytes(raw))
            }
            Plan::Bytes => {
                let len = self.read_len()?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            Plan::String => Value::String(self.read_string()?),
            Plan::Fixed(size) => Value::Fixed(*size, self.take(*size)?.to_vec()),
            Plan::Enum(symbols) => {
                let index = self.read_int()?;
                let symbol = usize::try_from(index)
                    .ok()
                    .and_then(|i| symbols.get(i))
                    .ok_or_else(|| format!("enum index {} out of range", index))?;
                Value::Enum(index as u32, symbol.clone())
            }
            Plan::Union(variants) => {
                let index = self.read_long()?;
                let variant = usize::try_from(index)
                    .ok()
                    .and_then(|i| variants.get(i))
                    .ok_or_else(|| format!("union index {} out of range", index))?;
                Value::Union(index as u32, Box::new(self.read(variant)?))
            }
            Plan::Array(items) => {
                let width = items.min_width();
                let mut values = Vec::new();
                while let Some(count) = self.read_block_count(width, values.len())? {
                    for _ in 0..count {
                        values.push(self.read(items)?);
                    }
                }
                Value::Array(values)
            }
            Plan::Map(values) => {
                // every entry carries at least its key's length prefix
                let width = 1 + values.min_width();
                let mut entries = HashMap::new();
                while let Some(count) = self.read_block_count(width, entries.len())? {
                    for _ in 0..count {
                        let key = self.read_string()?;
                        let value = self.read(values)?;
                        entries.insert(key, value);
                    }
                }
                Value::Map(entries)
            }
            Plan::Record(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    values.push((name.clone(), self.read(field)?));
                }
                Value::Record(values)
            }
        })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                format!(
                    "unexpected end of payload: need {} bytes at offset {}, have {}",
                    len,
                    self.pos,
                    self.buf.len().saturating_sub(self.pos)
                )
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Zigzag varint
    fn read_long(&mut self) -> Result<i64, String> {
        let mut raw: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.take(1)?[0];
            raw |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err("varint overflows a long".to_string());
            }
        }
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn read_int(&mut self) -> Result<i32, String> {
        let value = self.read_long()?;
        i32::try_from(value).map_err(|_| format!("value {} overflows an int", value))
    }

    fn read_len(&mut self) -> Result<usize, String> {
        let len = self.read_long()?;
        usize::try_from(len).map_err(|_| format!("negative length {}", len))
    }

    fn read_string(&mut self) -> Result<String, String> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
    }

    /// Item count of the next array/map block, `None` at the terminating block.
    /// A negative count is followed by the block's byte size, which is skipped.
    ///
    /// Counts are bounded before anything is allocated: by the bytes left when
    /// an item is at least `item_width` wide, otherwise by the decode
    /// allocation limit across all `decoded` items so far.
    fn read_block_count(
        &mut self,
        item_width: usize,
        decoded: usize,
    ) -> Result<Option<usize>, String> {
        let count = self.read_long()?;
        if count == 0 {
            return Ok(None);
        }
        if count < 0 {
            self.read_long()?;
        }
        let count = usize::try_from(count.unsigned_abs())
            .map_err(|_| format!("block count {} does not fit in memory", count))?;

        let remaining = self.buf.len().saturating_sub(self.pos);
        if item_width > 0 {
            if count.saturating_mul(item_width) > remaining {
                return Err(format!(
                    "block of {} items needs at least {} bytes, {} remain",
                    count,
                    count.saturating_mul(item_width),
                    remaining
                ));
            }
        } else {
            let limit = apache_avro::max_allocation_bytes(DEFAULT_MAX_ALLOCATION_BYTES);
            let needed = decoded
                .saturating_add(count)
                .saturating_mul(std::mem::size_of::<Value>());
            if needed > limit {
                return Err(format!(
                    "Unable to allocate {} bytes (maximum allowed: {})",
                    needed, limit
                ));
            }
        }
        Ok(Some(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReferenceDecoder;

    fn decode_both(schema_json: &str, value: Value) -> (Value, Value) {
        let schema = Arc::new(Schema::parse_str(schema_json).unwrap());
        let body = apache_avro::to_avro_datum(&schema, value).unwrap();

        let fast = CompiledEngine.bind(&schema, None).unwrap();
        let fast_value = fast.decode(&mut Cursor::new(&body[..])).unwrap();
        let reference_value = ReferenceDecoder::new(schema, None)
            .decode(&mut Cursor::new(&body[..]))
            .unwrap();
        (fast_value, reference_value)
    }

    #[test]
    fn test_matches_reference_for_rich_record() {
        let schema = r#"{
            "type": "record",
            "name": "Order",
            "namespace": "test",
            "fields": [
                {"name": "id", "type": "long"},
                {"name": "qty", "type": "int"},
                {"name": "price", "type": "double"},
                {"name": "ratio", "type": "float"},
                {"name": "paid", "type": "boolean"},
                {"name": "note", "type": ["null", "string"]},
                {"name": "tags", "type": {"type": "array", "items": "string"}},
                {"name": "status", "type": {"type": "enum", "name": "Status", "symbols": ["NEW", "DONE"]}},
                {"name": "hash", "type": {"type": "fixed", "name": "Hash", "size": 4}},
                {"name": "raw", "type": "bytes"}
            ]
        }"#;
        let value = Value::Record(vec![
            ("id".to_string(), Value::Long(-1_234_567_890_123)),
            ("qty".to_string(), Value::Int(42)),
            ("price".to_string(), Value::Double(9.75)),
            ("ratio".to_string(), Value::Float(0.5)),
            ("paid".to_string(), Value::Boolean(true)),
            ("note".to_string(), Value::Union(1, Box::new(Value::String("rush".to_string())))),
            (
                "tags".to_string(),
                Value::Array(vec![Value::String("a".to_string()), Value::String("b".to_string())]),
            ),
            ("status".to_string(), Value::Enum(1, "DONE".to_string())),
            ("hash".to_string(), Value::Fixed(4, vec![1, 2, 3, 4])),
            ("raw".to_string(), Value::Bytes(vec![0xde, 0xad])),
        ]);

        let (fast, reference) = decode_both(schema, value.clone());
        assert_eq!(fast, reference);
        assert_eq!(fast, value);
    }

    #[test]
    fn test_matches_reference_for_map() {
        let mut entries = HashMap::new();
        entries.insert("x".to_string(), Value::Long(1));
        entries.insert("y".to_string(), Value::Long(-1));

        let (fast, reference) =
            decode_both(r#"{"type":"map","values":"long"}"#, Value::Map(entries));
        assert_eq!(fast, reference);
    }

    #[test]
    fn test_negative_block_count_with_size() {
        // One block of -2 items (byte size 2), then terminator
        let body = [0x03, 0x04, 0x02, 0x04, 0x00];
        let schema = Arc::new(Schema::parse_str(r#"{"type":"array","items":"int"}"#).unwrap());
        let decoder = CompiledEngine.bind(&schema, None).unwrap();
        let value = decoder.decode(&mut Cursor::new(&body[..])).unwrap();
        assert_eq!(value, Value::Array(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_oversized_block_of_empty_items_rejected() {
        // zigzag(1 << 30) claims a billion nulls, then the terminator
        let body = [0x80, 0x80, 0x80, 0x80, 0x08, 0x00];
        let schema = Arc::new(Schema::parse_str(r#"{"type":"array","items":"null"}"#).unwrap());

        let decoder = CompiledEngine.bind(&schema, None).unwrap();
        let err = decoder.decode(&mut Cursor::new(&body[..])).unwrap_err();
        assert!(err.contains("Unable to allocate"));

        let mut payload = Cursor::new(&body[..]);
        let outcome = crate::engine::probe(&CompiledEngine, &schema, None, &mut payload);
        assert!(matches!(outcome, crate::engine::Probe::Unsupported(_)));
        assert_eq!(payload.position(), 0);
    }

    #[test]
    fn test_block_count_bounded_by_remaining_bytes() {
        // claims 100 ints with two bytes left
        let body = [0xc8, 0x01, 0x02, 0x04];
        let schema = Arc::new(Schema::parse_str(r#"{"type":"array","items":"int"}"#).unwrap());
        let decoder = CompiledEngine.bind(&schema, None).unwrap();
        assert!(decoder.decode(&mut Cursor::new(&body[..])).is_err());

        // a map entry is never narrower than its key prefix
        let body = [0xc8, 0x01, 0x00];
        let schema = Arc::new(Schema::parse_str(r#"{"type":"map","values":"null"}"#).unwrap());
        let decoder = CompiledEngine.bind(&schema, None).unwrap();
        assert!(decoder.decode(&mut Cursor::new(&body[..])).is_err());
    }

    #[test]
    fn test_small_block_of_nulls_decodes() {
        let body = [0x06, 0x00];
        let schema = Arc::new(Schema::parse_str(r#"{"type":"array","items":"null"}"#).unwrap());
        let decoder = CompiledEngine.bind(&schema, None).unwrap();
        assert_eq!(
            decoder.decode(&mut Cursor::new(&body[..])).unwrap(),
            Value::Array(vec![Value::Null, Value::Null, Value::Null])
        );
    }

    #[test]
    fn test_logical_types_unsupported() {
        let schema = Arc::new(
            Schema::parse_str(
                r#"{"type":"record","name":"Event","fields":[{"name":"at","type":{"type":"long","logicalType":"timestamp-millis"}}]}"#,
            )
            .unwrap(),
        );
        assert!(CompiledEngine.bind(&schema, None).is_err());
    }

    #[test]
    fn test_recursive_schema_unsupported() {
        let schema = Arc::new(
            Schema::parse_str(
                r#"{"type":"record","name":"Node","fields":[{"name":"next","type":["null","Node"]}]}"#,
            )
            .unwrap(),
        );
        assert!(CompiledEngine.bind(&schema, None).is_err());
    }

    #[test]
    fn test_reader_schema_applied() {
        let writer = Arc::new(
            Schema::parse_str(
                r#"{"type":"record","name":"User","fields":[{"name":"name","type":"string"},{"name":"age","type":"int"}]}"#,
            )
            .unwrap(),
        );
        let reader = Arc::new(
            Schema::parse_str(
                r#"{"type":"record","name":"User","fields":[{"name":"name","type":"string"}]}"#,
            )
            .unwrap(),
        );
        let body = [0x06, b'b', b'o', b'b', 0x54];

        let decoder = CompiledEngine.bind(&writer, Some(&reader)).unwrap();
        let value = decoder.decode(&mut Cursor::new(&body[..])).unwrap();
        assert_eq!(
            value,
            Value::Record(vec![("name".to_string(), Value::String("bob".to_string()))])
        );
    }

    #[test]
    fn test_invalid_boolean_rejected() {
        let schema = Arc::new(Schema::parse_str(r#""boolean""#).unwrap());
        let decoder = CompiledEngine.bind(&schema, None).unwrap();
        assert!(decoder.decode(&mut Cursor::new(&[0x02][..])).is_err());
    }

    #[test]
    fn test_cursor_advances_past_datum() {
        let schema = Arc::new(Schema::parse_str(r#""long""#).unwrap());
        let decoder = CompiledEngine.bind(&schema, None).unwrap();
        let body = [0x02, 0xff];
        let mut payload = Cursor::new(&body[..]);
        assert_eq!(decoder.decode(&mut payload).unwrap(), Value::Long(1));
        assert_eq!(payload.position(), 1);
    }
}
