//! Shared types used by the volume group CRDs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a PersistentVolumeClaim recorded as a group member.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReference {
    /// Namespace of the claim.
    pub namespace: String,
    /// Name of the claim.
    pub name: String,
}

impl ClaimReference {
    /// Build a reference from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ClaimReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-reference from a VolumeGroupContent to its owning VolumeGroup.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupRef {
    /// Namespace of the owning group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the owning group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// UID of the owning group, pinning the reference to one incarnation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Last observed error on a group or content object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupError {
    /// Human-readable failure message, including the namespace/name of the
    /// objects involved so operators can correlate without log access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GroupError {
    /// Wrap a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_reference_displays_as_namespace_slash_name() {
        let claim = ClaimReference::new("prod", "db-data");
        assert_eq!(claim.to_string(), "prod/db-data");
    }

    #[test]
    fn claim_reference_equality_is_namespace_and_name() {
        assert_eq!(ClaimReference::new("a", "x"), ClaimReference::new("a", "x"));
        assert_ne!(ClaimReference::new("a", "x"), ClaimReference::new("b", "x"));
    }
}
