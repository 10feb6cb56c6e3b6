//! VolumeGroupClass object
//!
//! Administrator-supplied template binding a VolumeGroup to a CSI driver
//! with default parameters. Like a StorageClass, the fields live at the top
//! level of the object rather than under `spec`, so the `kube::Resource`
//! machinery is implemented by hand instead of through the derive.
//!
//! Parameters whose key starts with [`crate::RESERVED_PARAMETER_PREFIX`]
//! are consumed by the controller (secret lookup) and stripped before the
//! map is forwarded to the driver; an unrecognized reserved key fails
//! validation.

use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::SecretReference;
use kube::core::{ClusterResourceScope, ObjectMeta};
use kube::Resource;
use serde::{Deserialize, Serialize};

use crate::{Error, RESERVED_PARAMETER_PREFIX};

/// Reserved parameter naming the secret forwarded to the driver.
pub const SECRET_NAME_PARAMETER: &str = "volumegroup.storage/secret-name";
/// Reserved parameter naming the namespace of that secret.
pub const SECRET_NAMESPACE_PARAMETER: &str = "volumegroup.storage/secret-namespace";

/// Driver binding and default parameters for VolumeGroups.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupClass {
    /// Standard object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Name of the CSI driver that realizes groups of this class.
    pub driver: String,

    /// Creation parameters, forwarded to the driver after the reserved
    /// prefix is stripped.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl Resource for VolumeGroupClass {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "VolumeGroupClass".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "csi.ibm.com".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "volumegroupclasses".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl VolumeGroupClass {
    /// Reject parameters carrying the reserved prefix with a key the
    /// controller does not understand.
    pub fn validate_parameters(&self) -> Result<(), Error> {
        for key in self.parameters.keys() {
            let reserved = key.starts_with(RESERVED_PARAMETER_PREFIX);
            if reserved && key != SECRET_NAME_PARAMETER && key != SECRET_NAMESPACE_PARAMETER {
                return Err(Error::validation(format!(
                    "volumeGroupClass {} has an invalid prefixed parameter {}",
                    self.meta().name.as_deref().unwrap_or_default(),
                    key
                )));
            }
        }
        Ok(())
    }

    /// The parameter map the driver sees: all reserved-prefix keys removed.
    pub fn driver_parameters(&self) -> BTreeMap<String, String> {
        self.parameters
            .iter()
            .filter(|(key, _)| !key.starts_with(RESERVED_PARAMETER_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Secret reference carried in the reserved parameters, if any.
    ///
    /// Returns `None` when no secret name is set; a name without a
    /// namespace yields a reference with only the name populated (resolution
    /// will then fail with a dependency error naming the class).
    pub fn secret_reference(&self) -> Option<SecretReference> {
        let name = self.parameters.get(SECRET_NAME_PARAMETER)?;
        Some(SecretReference {
            name: Some(name.clone()),
            namespace: self.parameters.get(SECRET_NAMESPACE_PARAMETER).cloned(),
        })
    }
}
