//! Encoding engines
//!
//! Writing always goes through apache-avro. Reading has two strategies:
//!
//! - **Reference**: [`ReferenceDecoder`], apache-avro's resolving decoder. Handles
//!   every schema apache-avro can parse.
//! - **Fast**: any [`FastDecoderEngine`]; the built-in one is [`CompiledEngine`].
//!   It may refuse a schema, which is reported as [`Probe::Unsupported`].

pub mod compiled;
pub mod reference;

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::Schema;
use serde::{Deserialize, Serialize};

pub use compiled::CompiledEngine;
pub use reference::ReferenceDecoder;

/// Encoder bound to one writer schema
#[derive(Debug, Clone)]
pub struct WriterContext {
    schema: Arc<Schema>,
}

impl WriterContext {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Append the Avro binary encoding of `record` to `out`.
    ///
    /// The record is resolved against the schema first, so maps are accepted
    /// for records and bare values for union branches.
    pub fn write(&self, record: Value, out: &mut Vec<u8>) -> Result<(), apache_avro::Error> {
        let resolved = record.resolve(&self.schema)?;
        let datum = apache_avro::to_avro_datum(&self.schema, resolved)?;
        out.extend_from_slice(&datum);
        Ok(())
    }
}

/// A decoder bound to a writer schema and an optional reader schema
pub trait DatumDecoder: Send + Sync {
    /// Decode one datum starting at the cursor position, advancing past it.
    fn decode(&self, payload: &mut Cursor<&[u8]>) -> Result<Value, String>;
}

/// An optional, faster decoding engine
pub trait FastDecoderEngine: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &'static str;

    /// Prepare a decoder for `writer`, resolving into `reader` when present.
    ///
    /// An `Err` means the engine cannot handle the schema.
    fn bind(
        &self,
        writer: &Arc<Schema>,
        reader: Option<&Arc<Schema>>,
    ) -> Result<Arc<dyn DatumDecoder>, String>;
}

/// Which decoding strategy an identifier is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    Fast,
    Reference,
}

impl fmt::Display for DecodeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStrategy::Fast => f.write_str("fast"),
            DecodeStrategy::Reference => f.write_str("reference"),
        }
    }
}

/// Outcome of a capability probe
pub enum Probe {
    /// The engine decoded the trial payload; carries the full decoder
    Supported(Arc<dyn DatumDecoder>),
    /// The engine cannot be used for this schema
    Unsupported(String),
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Supported(_) => f.write_str("Supported"),
            Probe::Unsupported(reason) => f.debug_tuple("Unsupported").field(reason).finish(),
        }
    }
}

/// Trial-decode `payload` with the writer schema alone.
///
/// The cursor is restored to its starting position whatever the outcome. On
/// success the returned decoder is bound to both writer and reader schemas.
pub fn probe(
    engine: &dyn FastDecoderEngine,
    writer: &Arc<Schema>,
    reader: Option<&Arc<Schema>>,
    payload: &mut Cursor<&[u8]>,
) -> Probe {
    let mark = payload.position();
    let trial = engine
        .bind(writer, None)
        .and_then(|decoder| decoder.decode(payload).map(|_| ()));
    payload.set_position(mark);

    if let Err(reason) = trial {
        return Probe::Unsupported(reason);
    }

    match engine.bind(writer, reader) {
        Ok(decoder) => Probe::Supported(decoder),
        Err(reason) => Probe::Unsupported(reason),
    }
}
