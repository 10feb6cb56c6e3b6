//! gRPC protocol definitions for the CSI volume group service
//!
//! This module contains the Protobuf messages and the unary gRPC client for
//! the `volumegroup.Controller` service exposed by CSI drivers that support
//! volume grouping. The definitions are small and stable (three unary
//! methods), so the prost/tonic output is checked in and maintained by hand
//! in generated style rather than produced by a protoc build step.
//!
//! # Protocol Overview
//!
//! The controller is the only caller; the driver sidecar serves:
//!
//! - `CreateVolumeGroup(name, parameters, secrets)` → group id + create time
//! - `ModifyVolumeGroup(group_id, volume_ids, secrets)`: replaces the
//!   group's member volume set
//! - `DeleteVolumeGroup(group_id, secrets)`
//!
//! Errors follow the standard gRPC status model (code + message).

#![allow(missing_docs)] // generated-style code carries proto comments only

/// A realized volume group on the storage backend.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VolumeGroup {
    /// The identifier of this volume group, generated by the plugin.
    /// This field is REQUIRED and MUST be unique within the storage system.
    #[prost(string, tag = "1")]
    pub volume_group_id: ::prost::alloc::string::String,
    /// Opaque driver-specific attributes of the group. This field is OPTIONAL.
    #[prost(map = "string, string", tag = "2")]
    pub volume_group_context: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    /// Timestamp when the volume group was created. This field is OPTIONAL.
    #[prost(message, optional, tag = "3")]
    pub created_at: ::core::option::Option<::prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateVolumeGroupRequest {
    /// Suggested name for the group. This field is REQUIRED. The plugin
    /// MUST treat the call as idempotent: creating a group that already
    /// exists under this name returns the existing group.
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Plugin-specific creation parameters. This field is OPTIONAL.
    #[prost(map = "string, string", tag = "2")]
    pub parameters: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    /// Secrets required by the plugin. This field is OPTIONAL.
    #[prost(map = "string, string", tag = "3")]
    pub secrets: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateVolumeGroupResponse {
    /// The created (or pre-existing) volume group. This field is REQUIRED.
    #[prost(message, optional, tag = "1")]
    pub volume_group: ::core::option::Option<VolumeGroup>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModifyVolumeGroupRequest {
    /// Identifier of the group to modify. This field is REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_group_id: ::prost::alloc::string::String,
    /// The full desired member set. Volumes present on the backend group
    /// but absent here MUST be removed, and vice versa.
    #[prost(string, repeated, tag = "2")]
    pub volume_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Secrets required by the plugin. This field is OPTIONAL.
    #[prost(map = "string, string", tag = "3")]
    pub secrets: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModifyVolumeGroupResponse {
    #[prost(message, optional, tag = "1")]
    pub volume_group: ::core::option::Option<VolumeGroup>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteVolumeGroupRequest {
    /// Identifier of the group to delete. This field is REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_group_id: ::prost::alloc::string::String,
    /// Secrets required by the plugin. This field is OPTIONAL.
    #[prost(map = "string, string", tag = "2")]
    pub secrets: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteVolumeGroupResponse {}

/// Generated client implementations.
pub mod controller_client {
    #![allow(unused_variables, dead_code, clippy::wildcard_imports)]
    use tonic::codegen::*;

    /// Client for the `volumegroup.Controller` service.
    #[derive(Debug, Clone)]
    pub struct ControllerClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl ControllerClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> ControllerClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub async fn create_volume_group(
            &mut self,
            request: impl tonic::IntoRequest<super::CreateVolumeGroupRequest>,
        ) -> std::result::Result<tonic::Response<super::CreateVolumeGroupResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/volumegroup.Controller/CreateVolumeGroup");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("volumegroup.Controller", "CreateVolumeGroup"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn modify_volume_group(
            &mut self,
            request: impl tonic::IntoRequest<super::ModifyVolumeGroupRequest>,
        ) -> std::result::Result<tonic::Response<super::ModifyVolumeGroupResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/volumegroup.Controller/ModifyVolumeGroup");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("volumegroup.Controller", "ModifyVolumeGroup"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn delete_volume_group(
            &mut self,
            request: impl tonic::IntoRequest<super::DeleteVolumeGroupRequest>,
        ) -> std::result::Result<tonic::Response<super::DeleteVolumeGroupResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/volumegroup.Controller/DeleteVolumeGroup");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("volumegroup.Controller", "DeleteVolumeGroup"));
            self.inner.unary(req, path, codec).await
        }
    }
}
