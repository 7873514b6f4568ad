//! Reference decoding through apache-avro

use std::io::Cursor;
use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::Schema;

use super::DatumDecoder;

/// apache-avro's resolving decoder, bound to a writer and optional reader schema
#[derive(Debug, Clone)]
pub struct ReferenceDecoder {
    writer: Arc<Schema>,
    reader: Option<Arc<Schema>>,
}

impl ReferenceDecoder {
    pub fn new(writer: Arc<Schema>, reader: Option<Arc<Schema>>) -> Self {
        Self { writer, reader }
    }
}

impl DatumDecoder for ReferenceDecoder {
    fn decode(&self, payload: &mut Cursor<&[u8]>) -> Result<Value, String> {
        apache_avro::from_avro_datum(&self.writer, payload, self.reader.as_deref())
            .map_err(|e| e.to_string())
    }
}
