//! Schema identifiers, message roles and subject naming

use std::fmt;

use apache_avro::Schema;
use serde::{Deserialize, Serialize};

/// Registry-assigned schema identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(u32);

impl SchemaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SchemaId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Which half of a message a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Key,
    Value,
}

impl Role {
    pub fn from_is_key(is_key: bool) -> Self {
        if is_key {
            Role::Key
        } else {
            Role::Value
        }
    }

    /// Suffix used by role-qualified subject names
    pub fn suffix(&self) -> &'static str {
        match self {
            Role::Key => "key",
            Role::Value => "value",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// How a registry subject is derived from a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectNameStrategy {
    /// `namespace.name`
    #[default]
    RecordName,
    /// `namespace.name-key` / `namespace.name-value`
    RecordNameWithRole,
}

/// Derive the registry subject for `schema`.
///
/// Returns `None` for schemas without a name (primitives, arrays, maps, unions).
pub fn subject_name(schema: &Schema, strategy: SubjectNameStrategy, role: Role) -> Option<String> {
    let name = schema.name()?;
    let record_name = match name.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{}.{}", namespace, name.name),
        _ => name.name.clone(),
    };

    Some(match strategy {
        SubjectNameStrategy::RecordName => record_name,
        SubjectNameStrategy::RecordNameWithRole => format!("{}-{}", record_name, role.suffix()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> Schema {
        Schema::parse_str(
            r#"{"type":"record","name":"User","namespace":"test","fields":[{"name":"name","type":"string"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_record_name_subject() {
        let subject = subject_name(&user_schema(), SubjectNameStrategy::RecordName, Role::Value);
        assert_eq!(subject.as_deref(), Some("test.User"));
    }

    #[test]
    fn test_role_qualified_subject() {
        let schema = user_schema();
        assert_eq!(
            subject_name(&schema, SubjectNameStrategy::RecordNameWithRole, Role::Key).as_deref(),
            Some("test.User-key")
        );
        assert_eq!(
            subject_name(&schema, SubjectNameStrategy::RecordNameWithRole, Role::Value).as_deref(),
            Some("test.User-value")
        );
    }

    #[test]
    fn test_subject_without_namespace() {
        let schema = Schema::parse_str(
            r#"{"type":"record","name":"Heartbeat","fields":[{"name":"beat","type":"long"}]}"#,
        )
        .unwrap();
        let subject = subject_name(&schema, SubjectNameStrategy::RecordName, Role::Value);
        assert_eq!(subject.as_deref(), Some("Heartbeat"));
    }

    #[test]
    fn test_unnamed_schema_has_no_subject() {
        let schema = Schema::parse_str(r#""string""#).unwrap();
        assert!(subject_name(&schema, SubjectNameStrategy::RecordName, Role::Key).is_none());
    }

    #[test]
    fn test_role_from_flag() {
        assert_eq!(Role::from_is_key(true), Role::Key);
        assert_eq!(Role::from_is_key(false), Role::Value);
        assert_eq!(Role::Key.to_string(), "key");
    }
}
