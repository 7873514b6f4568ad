//! Error types for the message serializer

use thiserror::Error;

use crate::schema::{Role, SchemaId};
use crate::wire::FramingError;

/// Result type for serializer operations
pub type Result<T> = std::result::Result<T, SerializerError>;

/// Serializer errors
#[derive(Error, Debug)]
pub enum SerializerError {
    #[error("Serialization error: {0}")]
    Framing(#[from] FramingError),

    #[error("Key serialization error: {0}")]
    KeySerialization(String),

    #[error("Value serialization error: {0}")]
    ValueSerialization(String),

    #[error("Serialization error: unable to fetch schema with id {id}: {reason}")]
    SchemaFetch { id: SchemaId, reason: String },

    #[error("Serialization error: failed to decode payload for schema id {id}: {reason}")]
    Decode { id: SchemaId, reason: String },

    #[error("Invalid reader schema: {0}")]
    ReaderSchema(String),

    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),
}

impl SerializerError {
    /// Build the role-scoped encode error for `role`
    pub fn for_role(role: Role, message: impl Into<String>) -> Self {
        match role {
            Role::Key => SerializerError::KeySerialization(message.into()),
            Role::Value => SerializerError::ValueSerialization(message.into()),
        }
    }

    /// Whether the envelope itself was rejected
    pub fn is_framing(&self) -> bool {
        matches!(self, SerializerError::Framing(_))
    }

    /// The role an encode error is scoped to, if any
    pub fn role(&self) -> Option<Role> {
        match self {
            SerializerError::KeySerialization(_) => Some(Role::Key),
            SerializerError::ValueSerialization(_) => Some(Role::Value),
            _ => None,
        }
    }
}
