//! Message Serializer
//!
//! Encodes Avro records into registry-framed messages and decodes them back,
//! caching one writer and one decoder binding per schema id.

use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::Schema;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::cache::{DecoderBinding, SchemaCache};
use crate::config::{CacheConfig, SerdeConfig};
use crate::engine::{
    self, CompiledEngine, DecodeStrategy, FastDecoderEngine, Probe, ReferenceDecoder,
    WriterContext,
};
use crate::error::{Result, SerializerError};
use crate::registry::RegistryClient;
use crate::schema::{subject_name, Role, SchemaId, SubjectNameStrategy};
use crate::wire::{decode_envelope, encode_envelope};

/// Registry-aware Avro serializer
pub struct MessageSerializer<R> {
    registry: R,
    cache: SchemaCache,
    reader_key_schema: Option<Arc<Schema>>,
    reader_value_schema: Option<Arc<Schema>>,
    subject_strategy: SubjectNameStrategy,
    fast_decoder: RwLock<Option<Arc<dyn FastDecoderEngine>>>,
}

impl<R: RegistryClient> MessageSerializer<R> {
    /// Serializer with no reader schemas, default subject naming and the
    /// compiled fast decoder enabled
    pub fn new(registry: R) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: R) -> MessageSerializerBuilder<R> {
        MessageSerializerBuilder::new(registry)
    }

    /// Build a serializer from loaded configuration, reading reader schemas from disk
    pub fn from_config(registry: R, config: &SerdeConfig) -> Result<Self> {
        let (key_schema, value_schema) = config.reader.load_schemas()?;

        let mut builder = Self::builder(registry)
            .cache(config.cache.clone())
            .subject_strategy(config.subject.strategy);
        if !config.decoder.fast_path {
            builder = builder.fast_decoder(None);
        }
        if let Some(schema) = key_schema {
            builder = builder.reader_key_schema(schema);
        }
        if let Some(schema) = value_schema {
            builder = builder.reader_value_schema(schema);
        }

        Ok(builder.build())
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Reader schema used when decoding records of `role`
    pub fn reader_schema(&self, role: Role) -> Option<&Arc<Schema>> {
        match role {
            Role::Key => self.reader_key_schema.as_ref(),
            Role::Value => self.reader_value_schema.as_ref(),
        }
    }

    /// Swap the fast engine used for ids that have not been bound yet.
    ///
    /// Existing bindings keep the strategy they were resolved with.
    pub fn set_fast_decoder(&self, engine: Option<Arc<dyn FastDecoderEngine>>) {
        *self.fast_decoder.write() = engine;
    }

    /// Strategy bound to `id`, if it has been decoded before
    pub fn decoder_strategy(&self, id: SchemaId) -> Option<DecodeStrategy> {
        self.cache.decoder(id).map(|binding| binding.strategy())
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Forget all writers and decoder bindings
    pub fn clear_caches(&self) {
        self.cache.clear();
    }

    /// Register `schema` under its derived subject and encode `record` with it.
    ///
    /// Registration always refreshes the cached writer for the returned id.
    pub fn encode_record_with_schema(
        &self,
        schema: &Schema,
        record: Value,
        role: Role,
    ) -> Result<Vec<u8>> {
        let subject = subject_name(schema, self.subject_strategy, role).ok_or_else(|| {
            SerializerError::for_role(role, "schema has no name to derive a subject from")
        })?;

        let id = self
            .registry
            .register(&subject, schema)
            .map_err(|e| {
                SerializerError::for_role(
                    role,
                    format!("unable to register schema for subject {}: {}", subject, e),
                )
            })?
            .ok_or_else(|| {
                SerializerError::for_role(
                    role,
                    format!("Unable to retrieve schema id for subject {}", subject),
                )
            })?;
        debug!(schema_id = %id, subject = %subject, role = %role, "registered schema");

        self.cache
            .insert_writer(id, WriterContext::new(Arc::new(schema.clone())));

        self.encode_record_with_schema_id(id, record, role)
    }

    /// Encode `record` with the schema registered as `id`
    pub fn encode_record_with_schema_id(
        &self,
        id: SchemaId,
        record: Value,
        role: Role,
    ) -> Result<Vec<u8>> {
        let writer = self.cache.writer_or_try_insert_with(
            id,
            || self.fetch_writer(id, role),
            |reason| SerializerError::for_role(role, reason),
        )?;

        let mut payload = Vec::new();
        writer.write(record, &mut payload).map_err(|e| {
            SerializerError::for_role(
                role,
                format!("failed to encode record with schema id {}: {}", id, e),
            )
        })?;

        Ok(encode_envelope(id, &payload))
    }

    /// Encode any serde-serializable record with the schema registered as `id`
    pub fn encode_serde<T: Serialize>(
        &self,
        id: SchemaId,
        record: &T,
        role: Role,
    ) -> Result<Vec<u8>> {
        let value = apache_avro::to_value(record)
            .map_err(|e| SerializerError::for_role(role, e.to_string()))?;
        self.encode_record_with_schema_id(id, value, role)
    }

    /// Decode a framed message. An absent message decodes to `None`.
    pub fn decode_message(&self, message: Option<&[u8]>, role: Role) -> Result<Option<Value>> {
        let message = match message {
            Some(message) => message,
            None => return Ok(None),
        };

        let mut envelope = decode_envelope(message)?;
        let id = envelope.schema_id;
        let binding = self.decoder_for(id, &mut envelope.payload, role)?;

        binding
            .decode(&mut envelope.payload)
            .map(Some)
            .map_err(|reason| SerializerError::Decode { id, reason })
    }

    /// Decode a framed message into a serde type
    pub fn decode_into<T: DeserializeOwned>(
        &self,
        message: Option<&[u8]>,
        role: Role,
    ) -> Result<Option<T>> {
        match self.decode_message(message, role)? {
            Some(value) => Ok(Some(apache_avro::from_value::<T>(&value)?)),
            None => Ok(None),
        }
    }

    fn fetch_writer(
        &self,
        id: SchemaId,
        role: Role,
    ) -> std::result::Result<WriterContext, String> {
        debug!(schema_id = %id, role = %role, "writer cache miss, fetching schema");
        match self.registry.get_by_id(id) {
            Ok(Some(schema)) => Ok(WriterContext::new(schema)),
            Ok(None) => Err(format!("Schema does not exist: id {}", id)),
            Err(e) => Err(format!("unable to fetch schema with id {}: {}", id, e)),
        }
    }

    fn decoder_for(
        &self,
        id: SchemaId,
        payload: &mut std::io::Cursor<&[u8]>,
        role: Role,
    ) -> Result<Arc<DecoderBinding>> {
        if let Some(binding) = self.cache.decoder(id) {
            trace!(schema_id = %id, strategy = %binding.strategy(), "decoder cache hit");
            return Ok(binding);
        }

        self.cache.decoder_or_try_insert_with(
            id,
            || self.resolve_decoder(id, payload, role),
            |reason| SerializerError::SchemaFetch { id, reason },
        )
    }

    /// Fetch the writer schema and pick a strategy by probing the fast engine
    /// against this payload. Fails with the registry's reason.
    fn resolve_decoder(
        &self,
        id: SchemaId,
        payload: &mut std::io::Cursor<&[u8]>,
        role: Role,
    ) -> std::result::Result<DecoderBinding, String> {
        debug!(schema_id = %id, role = %role, "decoder cache miss, fetching writer schema");
        let writer = match self.registry.get_by_id(id) {
            Ok(Some(schema)) => schema,
            Ok(None) => return Err("schema not found".to_string()),
            Err(e) => return Err(e.to_string()),
        };
        let reader = self.reader_schema(role).cloned();

        let fast = self.fast_decoder.read().clone();
        if let Some(fast) = fast {
            match engine::probe(fast.as_ref(), &writer, reader.as_ref(), payload) {
                Probe::Supported(decoder) => {
                    debug!(schema_id = %id, engine = fast.name(), "bound fast decoder");
                    return Ok(DecoderBinding::new(DecodeStrategy::Fast, decoder));
                }
                Probe::Unsupported(reason) => {
                    debug!(
                        schema_id = %id,
                        engine = fast.name(),
                        reason = %reason,
                        "fast decoder rejected schema, using reference decoder"
                    );
                }
            }
        }

        debug!(schema_id = %id, "bound reference decoder");
        Ok(DecoderBinding::new(
            DecodeStrategy::Reference,
            Arc::new(ReferenceDecoder::new(writer, reader)),
        ))
    }
}

/// Builder for [`MessageSerializer`]
pub struct MessageSerializerBuilder<R> {
    registry: R,
    reader_key_schema: Option<Arc<Schema>>,
    reader_value_schema: Option<Arc<Schema>>,
    subject_strategy: SubjectNameStrategy,
    cache: CacheConfig,
    fast_decoder: Option<Arc<dyn FastDecoderEngine>>,
}

impl<R: RegistryClient> MessageSerializerBuilder<R> {
    fn new(registry: R) -> Self {
        Self {
            registry,
            reader_key_schema: None,
            reader_value_schema: None,
            subject_strategy: SubjectNameStrategy::default(),
            cache: CacheConfig::default(),
            fast_decoder: Some(Arc::new(CompiledEngine)),
        }
    }

    pub fn reader_key_schema(mut self, schema: Schema) -> Self {
        self.reader_key_schema = Some(Arc::new(schema));
        self
    }

    pub fn reader_value_schema(mut self, schema: Schema) -> Self {
        self.reader_value_schema = Some(Arc::new(schema));
        self
    }

    pub fn subject_strategy(mut self, strategy: SubjectNameStrategy) -> Self {
        self.subject_strategy = strategy;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Fast engine to probe; `None` always uses the reference decoder
    pub fn fast_decoder(mut self, engine: Option<Arc<dyn FastDecoderEngine>>) -> Self {
        self.fast_decoder = engine;
        self
    }

    pub fn build(self) -> MessageSerializer<R> {
        MessageSerializer {
            registry: self.registry,
            cache: SchemaCache::new(&self.cache),
            reader_key_schema: self.reader_key_schema,
            reader_value_schema: self.reader_value_schema,
            subject_strategy: self.subject_strategy,
            fast_decoder: RwLock::new(self.fast_decoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;

    const USER: &str = r#"{"type":"record","name":"User","namespace":"test","fields":[{"name":"name","type":"string"}]}"#;

    fn user(name: &str) -> Value {
        Value::Record(vec![("name".to_string(), Value::String(name.to_string()))])
    }

    #[test]
    fn test_round_trip() {
        let serializer = MessageSerializer::new(InMemoryRegistry::new());
        let schema = Schema::parse_str(USER).unwrap();

        let bytes = serializer
            .encode_record_with_schema(&schema, user("alice"), Role::Value)
            .unwrap();
        let decoded = serializer.decode_message(Some(bytes.as_slice()), Role::Value).unwrap();
        assert_eq!(decoded, Some(user("alice")));
    }

    #[test]
    fn test_null_message() {
        let serializer = MessageSerializer::new(InMemoryRegistry::new());
        assert_eq!(serializer.decode_message(None, Role::Key).unwrap(), None);
        assert_eq!(serializer.registry().lookup_calls(), 0);
    }

    #[test]
    fn test_unnamed_schema_cannot_register() {
        let serializer = MessageSerializer::new(InMemoryRegistry::new());
        let schema = Schema::parse_str(r#""string""#).unwrap();
        let err = serializer
            .encode_record_with_schema(&schema, Value::String("x".to_string()), Role::Key)
            .unwrap_err();
        assert!(matches!(err, SerializerError::KeySerialization(_)));
    }

    #[test]
    fn test_unknown_id_is_role_scoped() {
        let serializer = MessageSerializer::new(InMemoryRegistry::new());
        let err = serializer
            .encode_record_with_schema_id(SchemaId::new(99), user("bob"), Role::Value)
            .unwrap_err();
        assert_eq!(err.to_string(), "Value serialization error: Schema does not exist: id 99");
    }

    #[test]
    fn test_registry_failure_reported_once() {
        let registry = InMemoryRegistry::new();
        registry.set_offline(true);
        let serializer = MessageSerializer::new(registry);

        let err = serializer
            .encode_record_with_schema_id(SchemaId::new(9), user("bob"), Role::Key)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Key serialization error: unable to fetch schema with id 9: \
             Schema registry unavailable: registry is offline"
        );

        let err = serializer
            .decode_message(Some(&[0, 0, 0, 0, 9, 1][..]), Role::Value)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Serialization error: unable to fetch schema with id 9: \
             Schema registry unavailable: registry is offline"
        );
    }

    #[test]
    fn test_from_config_disables_fast_path() {
        let mut config = SerdeConfig::default();
        config.decoder.fast_path = false;
        let serializer = MessageSerializer::from_config(InMemoryRegistry::new(), &config).unwrap();
        let schema = Schema::parse_str(USER).unwrap();

        let bytes = serializer
            .encode_record_with_schema(&schema, user("carol"), Role::Value)
            .unwrap();
        serializer.decode_message(Some(bytes.as_slice()), Role::Value).unwrap();

        let id = crate::wire::peek_schema_id(&bytes).unwrap();
        assert_eq!(serializer.decoder_strategy(id), Some(DecodeStrategy::Reference));
    }
}
