//! VolumeGroup Custom Resource Definition
//!
//! A VolumeGroup declares a named collection of claims the user wants the
//! storage backend to treat as one unit. Membership is either dynamic (a
//! label selector over claims) or static (a pre-provisioned
//! VolumeGroupContent bound by name): exactly one of the two.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClaimReference, GroupError};
use crate::Error;

/// Specification for a VolumeGroup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "csi.ibm.com",
    version = "v1",
    kind = "VolumeGroup",
    plural = "volumegroups",
    shortname = "vg",
    status = "VolumeGroupStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Content","type":"string","jsonPath":".status.boundVolumeGroupContentName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSpec {
    /// Name of the VolumeGroupClass binding this group to a driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_class_name: Option<String>,

    /// Membership source: dynamic selector or static content binding.
    #[serde(default)]
    pub source: VolumeGroupSource,
}

/// Membership source of a VolumeGroup.
///
/// A user sets exactly one field. After dynamic provisioning the controller
/// additionally records the created content's name here, so a bound dynamic
/// group legitimately carries both (see [`VolumeGroup::source`]).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSource {
    /// Label predicate selecting member claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Name of a pre-provisioned VolumeGroupContent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_content_name: Option<String>,
}

/// Status for a VolumeGroup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupStatus {
    /// Name of the VolumeGroupContent realizing this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_volume_group_content_name: Option<String>,

    /// When the backend group was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_creation_time: Option<Time>,

    /// Whether the group is realized on the backend. Unset until the first
    /// reconcile reaches a verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// Last reconcile error, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GroupError>,

    /// Claims currently realized as group members, in join order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pvc_list: Vec<ClaimReference>,
}

impl VolumeGroupStatus {
    /// Record a claim as a member. Idempotent.
    pub fn record_claim(&mut self, claim: ClaimReference) {
        if !self.contains_claim(&claim.namespace, &claim.name) {
            self.pvc_list.push(claim);
        }
    }

    /// Drop a claim from the membership list. Idempotent.
    pub fn remove_claim(&mut self, namespace: &str, name: &str) {
        self.pvc_list
            .retain(|c| !(c.namespace == namespace && c.name == name));
    }

    /// Membership as recorded in the status list, by namespace and name.
    pub fn contains_claim(&self, namespace: &str, name: &str) -> bool {
        self.pvc_list
            .iter()
            .any(|c| c.namespace == namespace && c.name == name)
    }
}

/// Resolved membership source of a group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupSource<'a> {
    /// Dynamic membership via label selector.
    Dynamic(&'a LabelSelector),
    /// Static binding to a pre-provisioned content object.
    Static(&'a str),
}

impl VolumeGroup {
    /// Classify the group's membership source, enforcing the exactly-one
    /// rule.
    ///
    /// Both fields set is tolerated only when the contentName is the one the
    /// controller bound itself (`status.boundVolumeGroupContentName`
    /// matches); a user-supplied double source is a validation error, as is
    /// an empty source.
    pub fn source(&self) -> Result<GroupSource<'_>, Error> {
        let selector = self.spec.source.selector.as_ref();
        let content_name = self.spec.source.volume_group_content_name.as_deref();
        let bound = self
            .status
            .as_ref()
            .and_then(|s| s.bound_volume_group_content_name.as_deref());

        match (selector, content_name) {
            (None, None) => Err(Error::validation(format!(
                "volumeGroup {}/{} must set exactly one of selector and volumeGroupContentName",
                self.namespace(),
                self.name()
            ))),
            (Some(selector), None) => Ok(GroupSource::Dynamic(selector)),
            (None, Some(content)) => Ok(GroupSource::Static(content)),
            (Some(selector), Some(content)) if bound == Some(content) => {
                Ok(GroupSource::Dynamic(selector))
            }
            (Some(_), Some(_)) => Err(Error::validation(format!(
                "volumeGroup {}/{} sets both selector and volumeGroupContentName",
                self.namespace(),
                self.name()
            ))),
        }
    }

    /// The content name this group is (or is being) bound to, if any.
    pub fn content_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bound_volume_group_content_name.as_deref())
            .or(self.spec.source.volume_group_content_name.as_deref())
    }

    /// Namespace of the group. VolumeGroups are namespaced, so the field is
    /// always populated on objects observed from the API server.
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Name of the group.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}
