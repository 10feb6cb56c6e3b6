//! VolumeGroupContent Custom Resource Definition
//!
//! The cluster-scoped, backend-side record of a VolumeGroup: it holds the
//! driver's opaque group handle and mirrors the group's claim membership as
//! a list of PersistentVolume names. Created by the controller right after
//! a successful CreateVolumeGroup call (or pre-provisioned by an
//! administrator for static groups) and deleted only after the backend
//! group is gone.

use k8s_openapi::api::core::v1::SecretReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{GroupError, VolumeGroupRef};
use super::{VolumeGroup, VolumeGroupClass};

/// Specification for a VolumeGroupContent
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "csi.ibm.com",
    version = "v1",
    kind = "VolumeGroupContent",
    plural = "volumegroupcontents",
    shortname = "vgc",
    status = "VolumeGroupContentStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.source.driver"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupContentSpec {
    /// The VolumeGroup this content realizes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_ref: Option<VolumeGroupRef>,

    /// Class the owning group was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_class_name: Option<String>,

    /// Backend identity of the group.
    #[serde(default)]
    pub source: VolumeGroupContentSource,

    /// Secret forwarded to the driver for group operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_secret_ref: Option<SecretReference>,

    /// PersistentVolumes bound to member claims, in join order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pv_list: Vec<String>,
}

/// Backend identity of a realized group.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupContentSource {
    /// Name of the CSI driver owning the backend group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    /// Opaque group identifier returned by CreateVolumeGroup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_group_handle: Option<String>,
}

/// Status for a VolumeGroupContent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupContentStatus {
    /// Whether the backend group is realized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// When the backend group was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_creation_time: Option<Time>,

    /// Last reconcile error, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GroupError>,
}

impl VolumeGroupContent {
    /// Build the content object for a freshly created backend group.
    pub fn for_group(
        name: &str,
        vg: &VolumeGroup,
        class: &VolumeGroupClass,
        handle: &str,
    ) -> Self {
        Self::new(
            name,
            VolumeGroupContentSpec {
                volume_group_ref: Some(VolumeGroupRef {
                    namespace: vg.metadata.namespace.clone(),
                    name: vg.metadata.name.clone(),
                    uid: vg.metadata.uid.clone(),
                }),
                volume_group_class_name: Some(class.name_any()),
                source: VolumeGroupContentSource {
                    driver: Some(class.driver.clone()),
                    volume_group_handle: Some(handle.to_string()),
                },
                volume_group_secret_ref: class.secret_reference(),
                pv_list: Vec::new(),
            },
        )
    }

    /// The backend group handle, if populated.
    pub fn handle(&self) -> Option<&str> {
        self.spec.source.volume_group_handle.as_deref()
    }

    /// Record a PersistentVolume as a member. Idempotent.
    pub fn record_pv(&mut self, pv_name: &str) {
        if !self.spec.pv_list.iter().any(|pv| pv == pv_name) {
            self.spec.pv_list.push(pv_name.to_string());
        }
    }

    /// Drop a PersistentVolume from the member list. Idempotent.
    pub fn remove_pv(&mut self, pv_name: &str) {
        self.spec.pv_list.retain(|pv| pv != pv_name);
    }
}
