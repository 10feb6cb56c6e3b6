//! Typed adapter over the CSI volume group RPC surface.
//!
//! [`VolumeGroupService`] is the seam the reconcilers call through; the
//! production implementation [`CsiVolumeGroupClient`] speaks gRPC to the
//! driver sidecar with the process-wide RPC deadline applied to every call.
//! Driver failures carry a [`DriverError`] that distinguishes retryable
//! transport conditions from terminal ones and surfaces the driver's own
//! status message to operators.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use thiserror::Error as ThisError;
use tonic::transport::Channel;
use tonic::Code;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::proto::controller_client::ControllerClient;
use crate::proto::{CreateVolumeGroupRequest, DeleteVolumeGroupRequest, ModifyVolumeGroupRequest};
use crate::Error;

/// Error returned by a driver RPC.
///
/// `code` is the gRPC status code when the failure came from the RPC layer;
/// `None` means the call failed before a status was produced (the message is
/// then the transport error, verbatim).
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct DriverError {
    code: Option<Code>,
    message: String,
}

impl DriverError {
    /// Wrap a transport-level failure that never reached the RPC layer.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// A locally-enforced deadline expiry for the named operation.
    pub fn deadline(operation: &str) -> Self {
        Self {
            code: Some(Code::DeadlineExceeded),
            message: format!("{operation} deadline exceeded"),
        }
    }

    /// gRPC status code, if the failure carried one.
    pub fn code(&self) -> Option<Code> {
        self.code
    }

    /// The driver's status message (or the transport error verbatim).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True for conditions that a later retry may clear without user
    /// intervention: deadline expiry, service unavailable, aborted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            Some(Code::DeadlineExceeded | Code::Unavailable | Code::Aborted)
        )
    }
}

impl From<tonic::Status> for DriverError {
    fn from(status: tonic::Status) -> Self {
        Self {
            code: Some(status.code()),
            message: status.message().to_string(),
        }
    }
}

/// Result of a successful CreateVolumeGroup call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedVolumeGroup {
    /// Opaque backend identifier for the group.
    pub handle: String,
    /// Creation timestamp reported by the driver, if any.
    pub creation_time: Option<Time>,
}

/// The three volume group operations the controller issues against a driver.
///
/// Mocked in tests; implemented over gRPC in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VolumeGroupService: Send + Sync {
    /// Create (or idempotently re-create) a backend volume group.
    async fn create_volume_group(
        &self,
        name: &str,
        parameters: &BTreeMap<String, String>,
        secrets: &BTreeMap<String, String>,
    ) -> Result<CreatedVolumeGroup, Error>;

    /// Replace the backend group's member volume set with `volume_ids`.
    async fn modify_volume_group(
        &self,
        group_id: &str,
        volume_ids: &[String],
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Delete the backend volume group.
    async fn delete_volume_group(
        &self,
        group_id: &str,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// gRPC-backed [`VolumeGroupService`] implementation.
///
/// Holds an established channel to the driver sidecar; channels are cheap
/// to clone, so each call uses its own client over the shared connection.
pub struct CsiVolumeGroupClient {
    channel: Channel,
    timeout: Duration,
}

impl CsiVolumeGroupClient {
    /// Wrap an established channel, applying `timeout` to every RPC.
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    fn client(&self) -> ControllerClient<Channel> {
        ControllerClient::new(self.channel.clone())
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.timeout);
        request
    }
}

fn to_wire(map: &BTreeMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn timestamp_to_time(ts: prost_types::Timestamp) -> Option<Time> {
    chrono::DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32).map(Time)
}

#[async_trait]
impl VolumeGroupService for CsiVolumeGroupClient {
    async fn create_volume_group(
        &self,
        name: &str,
        parameters: &BTreeMap<String, String>,
        secrets: &BTreeMap<String, String>,
    ) -> Result<CreatedVolumeGroup, Error> {
        let request = self.request(CreateVolumeGroupRequest {
            name: name.to_string(),
            parameters: to_wire(parameters),
            secrets: to_wire(secrets),
        });

        let mut client = self.client();
        let response = tokio::time::timeout(self.timeout, client.create_volume_group(request))
            .await
            .map_err(|_| DriverError::deadline("CreateVolumeGroup"))?
            .map_err(DriverError::from)?
            .into_inner();

        let group = response.volume_group.ok_or_else(|| {
            DriverError::transport(format!("driver returned no volume group for {name}"))
        })?;

        debug!(name, handle = %group.volume_group_id, "created backend volume group");
        Ok(CreatedVolumeGroup {
            handle: group.volume_group_id,
            creation_time: group.created_at.and_then(timestamp_to_time),
        })
    }

    async fn modify_volume_group(
        &self,
        group_id: &str,
        volume_ids: &[String],
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let request = self.request(ModifyVolumeGroupRequest {
            volume_group_id: group_id.to_string(),
            volume_ids: volume_ids.to_vec(),
            secrets: to_wire(secrets),
        });

        let mut client = self.client();
        tokio::time::timeout(self.timeout, client.modify_volume_group(request))
            .await
            .map_err(|_| DriverError::deadline("ModifyVolumeGroup"))?
            .map_err(DriverError::from)?;

        debug!(group_id, members = volume_ids.len(), "modified backend volume group");
        Ok(())
    }

    async fn delete_volume_group(
        &self,
        group_id: &str,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let request = self.request(DeleteVolumeGroupRequest {
            volume_group_id: group_id.to_string(),
            secrets: to_wire(secrets),
        });

        let mut client = self.client();
        tokio::time::timeout(self.timeout, client.delete_volume_group(request))
            .await
            .map_err(|_| DriverError::deadline("DeleteVolumeGroup"))?
            .map_err(DriverError::from)?;

        debug!(group_id, "deleted backend volume group");
        Ok(())
    }
}
