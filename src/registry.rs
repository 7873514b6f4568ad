//! Schema Registry client
//!
//! The serializer talks to a registry only through [`RegistryClient`]. Network
//! clients live outside this crate; [`InMemoryRegistry`] is an in-process
//! implementation for tests and embedded deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use apache_avro::Schema;
use parking_lot::RwLock;
use thiserror::Error;

use crate::checksum::Checksum;
use crate::schema::SchemaId;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Schema registry unavailable: {0}")]
    Unavailable(String),

    #[error("Schema rejected for subject {subject}: {reason}")]
    Rejected { subject: String, reason: String },

    #[error("Schema registry transport error: {0}")]
    Transport(String),
}

/// The registry operations the serializer depends on.
///
/// Calls are blocking round trips; timeouts and retries belong to the
/// implementation.
pub trait RegistryClient: Send + Sync {
    /// Register `schema` under `subject`, returning its identifier.
    fn register(&self, subject: &str, schema: &Schema) -> Result<Option<SchemaId>, RegistryError>;

    /// Look up a schema by identifier. `Ok(None)` means the id is unknown.
    fn get_by_id(&self, id: SchemaId) -> Result<Option<Arc<Schema>>, RegistryError>;
}

impl<T: RegistryClient + ?Sized> RegistryClient for Arc<T> {
    fn register(&self, subject: &str, schema: &Schema) -> Result<Option<SchemaId>, RegistryError> {
        (**self).register(subject, schema)
    }

    fn get_by_id(&self, id: SchemaId) -> Result<Option<Arc<Schema>>, RegistryError> {
        (**self).get_by_id(id)
    }
}

#[derive(Default)]
struct RegistryState {
    /// Schemas by id
    by_id: HashMap<SchemaId, Arc<Schema>>,
    /// Ids by canonical fingerprint, shared across subjects
    by_fingerprint: HashMap<Checksum, SchemaId>,
    /// Registered ids per subject, in registration order
    subjects: HashMap<String, Vec<SchemaId>>,
}

/// In-process registry
///
/// Identifiers are global: registering the same canonical schema under two
/// subjects yields the same id. Every call is counted so callers can assert on
/// registry round trips.
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU32,
    offline: AtomicBool,
    register_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    /// Create an empty registry handing out ids from 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create an empty registry whose first id is `first_id`
    pub fn starting_at(first_id: u32) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU32::new(first_id),
            offline: AtomicBool::new(false),
            register_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call fail with [`RegistryError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `register` calls served so far (including failed ones)
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_by_id` calls served so far (including failed ones)
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Ids registered under `subject`, oldest first
    pub fn versions(&self, subject: &str) -> Vec<SchemaId> {
        self.state.read().subjects.get(subject).cloned().unwrap_or_default()
    }

    /// Latest id registered under `subject`
    pub fn latest(&self, subject: &str) -> Option<SchemaId> {
        self.state
            .read()
            .subjects
            .get(subject)
            .and_then(|ids| ids.last().copied())
    }

    /// All known subjects, sorted
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<_> = self.state.read().subjects.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    fn check_online(&self) -> Result<(), RegistryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("registry is offline".to_string()));
        }
        Ok(())
    }
}

impl RegistryClient for InMemoryRegistry {
    fn register(&self, subject: &str, schema: &Schema) -> Result<Option<SchemaId>, RegistryError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        if subject.is_empty() {
            return Err(RegistryError::Rejected {
                subject: subject.to_string(),
                reason: "subject must not be empty".to_string(),
            });
        }

        let fingerprint = Checksum::of_schema(schema);
        let mut state = self.state.write();

        let id = match state.by_fingerprint.get(&fingerprint) {
            Some(id) => *id,
            None => {
                let id = SchemaId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                state.by_fingerprint.insert(fingerprint, id);
                state.by_id.insert(id, Arc::new(schema.clone()));
                id
            }
        };

        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }

        Ok(Some(id))
    }

    fn get_by_id(&self, id: SchemaId) -> Result<Option<Arc<Schema>>, RegistryError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.state.read().by_id.get(&id).cloned())
    }
}
