//! Per-schema-id caches for writers and decoder bindings
//!
//! Both maps are `moka::sync::Cache`s. `try_get_with` coalesces concurrent
//! initialization for the same key, so the first use of an id costs one
//! registry round trip and one strategy probe even under contention. Failed
//! initializations are not stored; their reason is handed to every waiting
//! caller.
//!
//! Entries are never evicted unless [`CacheConfig`] sets a capacity or an idle
//! timeout. Unbounded is the default; under heavy schema churn set
//! `max_entries`.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use apache_avro::types::Value;
use moka::sync::Cache;

use crate::config::CacheConfig;
use crate::engine::{DatumDecoder, DecodeStrategy, WriterContext};
use crate::error::{Result, SerializerError};
use crate::schema::SchemaId;

/// A resolved decode function for one schema id
#[derive(Clone)]
pub struct DecoderBinding {
    strategy: DecodeStrategy,
    decoder: Arc<dyn DatumDecoder>,
}

impl DecoderBinding {
    pub fn new(strategy: DecodeStrategy, decoder: Arc<dyn DatumDecoder>) -> Self {
        Self { strategy, decoder }
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.strategy
    }

    pub fn decode(&self, payload: &mut Cursor<&[u8]>) -> std::result::Result<Value, String> {
        self.decoder.decode(payload)
    }
}

impl std::fmt::Debug for DecoderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderBinding")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Writer contexts and decoder bindings keyed by schema id
pub struct SchemaCache {
    writers: Cache<SchemaId, Arc<WriterContext>>,
    decoders: Cache<SchemaId, Arc<DecoderBinding>>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl SchemaCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            writers: build_cache(config),
            decoders: build_cache(config),
        }
    }

    pub fn writer(&self, id: SchemaId) -> Option<Arc<WriterContext>> {
        self.writers.get(&id)
    }

    /// Store a writer, replacing any existing one for `id`
    pub fn insert_writer(&self, id: SchemaId, writer: WriterContext) -> Arc<WriterContext> {
        let writer = Arc::new(writer);
        self.writers.insert(id, Arc::clone(&writer));
        writer
    }

    /// Cached writer for `id`, or the result of `init` stored on success.
    ///
    /// `init` fails with a bare reason; `on_error` turns it into the caller's
    /// error. Every caller waiting on the same failed initialization gets it.
    pub fn writer_or_try_insert_with<F, E>(
        &self,
        id: SchemaId,
        init: F,
        on_error: E,
    ) -> Result<Arc<WriterContext>>
    where
        F: FnOnce() -> std::result::Result<WriterContext, String>,
        E: FnOnce(String) -> SerializerError,
    {
        self.writers
            .try_get_with(id, || init().map(Arc::new))
            .map_err(|reason: Arc<String>| on_error(reason.as_ref().clone()))
    }

    pub fn decoder(&self, id: SchemaId) -> Option<Arc<DecoderBinding>> {
        self.decoders.get(&id)
    }

    /// Cached binding for `id`, or the result of `init` stored on success
    pub fn decoder_or_try_insert_with<F, E>(
        &self,
        id: SchemaId,
        init: F,
        on_error: E,
    ) -> Result<Arc<DecoderBinding>>
    where
        F: FnOnce() -> std::result::Result<DecoderBinding, String>,
        E: FnOnce(String) -> SerializerError,
    {
        self.decoders
            .try_get_with(id, || init().map(Arc::new))
            .map_err(|reason: Arc<String>| on_error(reason.as_ref().clone()))
    }

    /// Drop every writer and binding
    pub fn clear(&self) {
        self.writers.invalidate_all();
        self.decoders.invalidate_all();
        self.writers.run_pending_tasks();
        self.decoders.run_pending_tasks();
    }

    pub fn writer_count(&self) -> u64 {
        self.writers.run_pending_tasks();
        self.writers.entry_count()
    }

    pub fn decoder_count(&self) -> u64 {
        self.decoders.run_pending_tasks();
        self.decoders.entry_count()
    }
}

fn build_cache<V>(config: &CacheConfig) -> Cache<SchemaId, V>
where
    V: Clone + Send + Sync + 'static,
{
    let mut builder = Cache::builder();
    if let Some(max_entries) = config.max_entries {
        builder = builder.max_capacity(max_entries);
    }
    if let Some(secs) = config.time_to_idle_secs {
        builder = builder.time_to_idle(Duration::from_secs(secs));
    }
    builder.build()
}
