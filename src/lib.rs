//! Registry Serde
//!
//! Schema-registry-aware Avro serialization for messages exchanged over the
//! Familiar event bus.
//!
//! ## Features
//!
//! - **Self-describing messages**: every message carries the registry id of its writer schema
//! - **Registry round trips on first use only**: writers and decoders are cached per schema id
//! - **Two decoding strategies**: a compiled fast decoder, with apache-avro as the fallback
//! - **Schema evolution**: optional key and value reader schemas
//!
//! ## Message layout
//!
//! ```text
//! offset 0      magic byte 0x00
//! offset 1..4   schema id, u32 big-endian
//! offset 5..    Avro binary datum
//! ```
//!
//! ## Example
//!
//! ```
//! use apache_avro::{types::Value, Schema};
//! use registry_serde::{InMemoryRegistry, MessageSerializer, Role};
//!
//! let schema = Schema::parse_str(
//!     r#"{"type":"record","name":"User","namespace":"test","fields":[{"name":"name","type":"string"}]}"#,
//! ).unwrap();
//! let serializer = MessageSerializer::new(InMemoryRegistry::new());
//!
//! let record = Value::Record(vec![("name".into(), Value::String("alice".into()))]);
//! let bytes = serializer.encode_record_with_schema(&schema, record.clone(), Role::Value).unwrap();
//! assert_eq!(bytes[0], 0x00);
//!
//! let decoded = serializer.decode_message(Some(bytes.as_slice()), Role::Value).unwrap();
//! assert_eq!(decoded, Some(record));
//! ```

pub mod cache;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod schema;
pub mod serializer;
pub mod wire;

pub use cache::{DecoderBinding, SchemaCache};
pub use checksum::Checksum;
pub use config::{CacheConfig, SerdeConfig};
pub use engine::{CompiledEngine, DecodeStrategy, FastDecoderEngine, Probe};
pub use error::{Result, SerializerError};
pub use registry::{InMemoryRegistry, RegistryClient, RegistryError};
pub use schema::{Role, SchemaId, SubjectNameStrategy};
pub use serializer::{MessageSerializer, MessageSerializerBuilder};
pub use wire::{FramingError, HEADER_SIZE, MAGIC_BYTE};
