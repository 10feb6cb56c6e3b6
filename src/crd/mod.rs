//! Custom Resource Definitions for the volume group operator
//!
//! This module contains the three custom kinds the controller works with:
//! [`VolumeGroup`] (user intent), [`VolumeGroupContent`] (realized backend
//! handle) and [`VolumeGroupClass`] (driver binding, read-only).

mod types;
mod volume_group;
mod volume_group_class;
mod volume_group_content;

pub use types::{ClaimReference, GroupError, VolumeGroupRef};
pub use volume_group::{
    GroupSource, VolumeGroup, VolumeGroupSource, VolumeGroupSpec, VolumeGroupStatus,
};
pub use volume_group_class::{
    VolumeGroupClass, SECRET_NAMESPACE_PARAMETER, SECRET_NAME_PARAMETER,
};
pub use volume_group_content::{
    VolumeGroupContent, VolumeGroupContentSource, VolumeGroupContentSpec, VolumeGroupContentStatus,
};
