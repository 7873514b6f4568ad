//! Wire envelope encoding and decoding.
//!
//! Every message carries a 5-byte header in front of the Avro payload:
//! ```text
//! ┌────────────┬─────────────┬──────────────────┐
//! │ Magic byte │ Schema ID   │ Payload          │
//! │ 1 byte     │ 4 bytes     │ variable         │
//! │ 0x00       │ uint32 BE   │ Avro binary datum│
//! └────────────┴─────────────┴──────────────────┘
//! ```

use std::io::Cursor;

use thiserror::Error;

use crate::schema::SchemaId;

/// The only supported format marker.
pub const MAGIC_BYTE: u8 = 0x00;

/// Header size in bytes (marker + schema id).
pub const HEADER_SIZE: usize = 5;

/// Envelope framing failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("message is too small to decode: {len} bytes, header needs 5")]
    MessageTooSmall { len: usize },

    #[error("message does not start with magic byte: expected 0x00, found {found:#04x}")]
    MagicByteMismatch { found: u8 },
}

/// A parsed envelope: the schema id and a cursor over the payload.
///
/// The cursor starts at offset 0 of the payload region (byte 5 of the message)
/// and can be rewound with `set_position`.
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub schema_id: SchemaId,
    pub payload: Cursor<&'a [u8]>,
}

/// Write the header followed by `payload` verbatim.
pub fn encode_envelope(schema_id: SchemaId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(MAGIC_BYTE);
    buf.extend_from_slice(&schema_id.value().to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Validate the header and split the message into schema id and payload.
pub fn decode_envelope(message: &[u8]) -> Result<Envelope<'_>, FramingError> {
    let schema_id = peek_schema_id(message)?;
    Ok(Envelope {
        schema_id,
        payload: Cursor::new(&message[HEADER_SIZE..]),
    })
}

/// Read only the schema id, without touching the payload.
pub fn peek_schema_id(message: &[u8]) -> Result<SchemaId, FramingError> {
    if message.len() < HEADER_SIZE {
        return Err(FramingError::MessageTooSmall { len: message.len() });
    }
    if message[0] != MAGIC_BYTE {
        return Err(FramingError::MagicByteMismatch { found: message[0] });
    }
    let id = u32::from_be_bytes([message[1], message[2], message[3], message[4]]);
    Ok(SchemaId::new(id))
}
