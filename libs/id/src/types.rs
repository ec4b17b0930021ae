//! Typed handle definitions.

use crate::{define_numeric_id, IdError};

// =============================================================================
// Coordinator Resources
// =============================================================================

define_numeric_id!(RunnerId, "runner id");
define_numeric_id!(InstallationId, "installation id");

// =============================================================================
// Compute Instances
// =============================================================================

/// Opaque handle of a compute instance, as issued by the provider.
///
/// The handle doubles as the runner name at the coordinator: an instance
/// registers itself under its own handle, which is what binds the two
/// resource spaces together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// Human-readable name of this handle kind.
    pub const KIND: &'static str = "instance id";

    /// Parses an instance handle. Any non-empty, whitespace-free string is
    /// accepted; the provider owns the format.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty { kind: Self::KIND });
        }
        if s.chars().any(char::is_whitespace) {
            return Err(IdError::Whitespace {
                kind: Self::KIND,
                value: s.to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for InstanceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for InstanceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
