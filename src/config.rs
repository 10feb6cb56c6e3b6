//! Process-wide driver configuration.
//!
//! Built once in `main` from CLI flags and passed explicitly to the
//! reconcilers through [`crate::controller::Context`]; there are no
//! mutable globals.

use std::time::Duration;

/// Immutable configuration shared by both reconcile loops.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Name of the CSI driver this controller instance owns. Volume groups
    /// whose class names a different driver are ignored.
    pub driver_name: String,
    /// Deadline applied to every driver RPC.
    pub rpc_timeout: Duration,
    /// When true, a claim may belong to any number of groups and the
    /// single-group admission check is bypassed.
    pub multiple_vgs_to_pvc: bool,
    /// Prefix for backend group names; the full name is `<prefix>-<VG UID>`.
    pub volume_group_name_prefix: String,
}

impl DriverConfig {
    /// Compute the backend group name for a volume group UID.
    ///
    /// An empty UID means the object is corrupt (the API server always
    /// assigns one) and is rejected.
    pub fn volume_group_name(&self, uid: &str) -> Result<String, crate::Error> {
        if uid.is_empty() {
            return Err(crate::Error::validation(
                "corrupted VolumeGroup object, it is missing UID",
            ));
        }
        Ok(format!("{}-{}", self.volume_group_name_prefix, uid))
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: String::new(),
            rpc_timeout: Duration::from_secs(120),
            multiple_vgs_to_pvc: false,
            volume_group_name_prefix: "volumegroup".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_name_is_prefix_dash_uid() {
        let cfg = DriverConfig::default();
        assert_eq!(
            cfg.volume_group_name("d4b4a6a5").unwrap(),
            "volumegroup-d4b4a6a5"
        );
    }

    #[test]
    fn missing_uid_is_rejected() {
        let cfg = DriverConfig::default();
        let err = cfg.volume_group_name("").unwrap_err();
        assert!(err.to_string().contains("missing UID"));
    }
}
