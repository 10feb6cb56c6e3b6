//! Volume group operator - CRD-driven controller for CSI volume groups
//!
//! The operator groups PersistentVolumeClaims into administrator-defined
//! VolumeGroups and keeps the grouping in sync with user intent: it
//! materializes each declared group on the storage backend over the CSI
//! volume group RPC surface, continuously reconciles the set of claims that
//! belong to each group against label-selector membership rules, and
//! mirrors observed state back onto the declarative objects.
//!
//! # Architecture
//!
//! Two cooperating reconcile loops share one membership core:
//! - The VolumeGroup loop owns the group lifecycle: backend create/delete,
//!   VolumeGroupContent binding, finalizer protocol, membership.
//! - The PersistentVolumeClaim loop reacts to claim changes: it removes a
//!   claim from groups it no longer matches and joins it to the group it
//!   now matches.
//!
//! All truth lives in the object store; every reconcile is idempotent and
//! re-derives state, so crashes and conflicting writes converge.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (VolumeGroup, VolumeGroupContent,
//!   VolumeGroupClass)
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`driver`] - Typed adapter over the CSI volume group RPC surface
//! - [`proto`] - gRPC protocol definitions for the driver service
//! - [`selector`] - Label-selector matching for group membership
//! - [`retry`] - Conflict retry for optimistic-concurrency writes
//! - [`events`] - Kubernetes Event recording
//! - [`config`] - Process-wide driver configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod driver;
pub mod error;
pub mod events;
pub mod proto;
pub mod retry;
pub mod selector;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Protocol constants
// =============================================================================
// These strings are contracts with the deployed ecosystem (other controllers
// key on the finalizer tokens) and with class/storage-class authors. They
// must not change.

/// Finalizer protecting VolumeGroup and VolumeGroupContent objects while
/// backend state exists.
pub const VOLUME_GROUP_FINALIZER: &str = "volumegroup.storage.ibm.io/vg-protection";

/// Finalizer protecting PersistentVolumeClaims that belong to a group.
pub const PVC_FINALIZER: &str = "volumegroup.storage.ibm.io/pvc-protection";

/// Class parameters with this prefix are consumed by the controller and
/// stripped before the parameter map reaches the driver.
pub const RESERVED_PARAMETER_PREFIX: &str = "volumegroup.storage/";

/// A storage class carrying this parameter statically groups its claims;
/// such claims are refused by the dynamic grouping loops.
pub const STORAGE_CLASS_GROUP_PARAMETER: &str = "volume_group";

/// Legacy annotation naming a claim's storage class, honored before the
/// spec field.
pub const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";
