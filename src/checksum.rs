//! Schema fingerprints for registry deduplication

use apache_avro::Schema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 fingerprint of a schema's Parsing Canonical Form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Fingerprint a parsed schema.
    ///
    /// Two schemas that differ only in docs, aliases or JSON attribute order
    /// share a canonical form and therefore a fingerprint. Record field order
    /// is significant.
    pub fn of_schema(schema: &Schema) -> Self {
        Self::from_bytes(schema.canonical_form().as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
