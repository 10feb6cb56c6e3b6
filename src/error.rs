//! Error types for the volume group operator

use thiserror::Error;

use crate::driver::DriverError;

/// Main error type for volume group operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs or class parameters
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced object (class, secret, content) is missing
    #[error("dependency error: {0}")]
    Dependency(String),

    /// CSI driver RPC error
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a dependency error with the given message
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True if the error is a resource-version conflict (HTTP 409).
    ///
    /// Conflicts are retried locally by [`crate::retry::retry_on_conflict`];
    /// every other error propagates to the dispatcher.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// True if the error is a not-found response (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// The message shown to operators on object status and in events.
    ///
    /// Driver errors surface the RPC status message (or the transport error
    /// verbatim); everything else uses the display form.
    pub fn status_message(&self) -> String {
        match self {
            Self::Driver(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "TestReason".to_string(),
            code,
        }))
    }

    /// Story: a stale resource version comes back as HTTP 409 and must be
    /// recognized so the write can be refetched and retried locally.
    #[test]
    fn conflict_is_detected_from_api_response() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(500).is_conflict());
        assert!(!Error::validation("nope").is_conflict());
    }

    /// Story: an object deleted between event and fetch comes back as 404
    /// and is treated as success by the reconcilers.
    #[test]
    fn not_found_is_detected_from_api_response() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
    }

    #[test]
    fn driver_errors_surface_the_rpc_message() {
        let err = Error::from(DriverError::from(tonic::Status::unavailable(
            "volume group service unavailable",
        )));
        assert_eq!(err.status_message(), "volume group service unavailable");
    }

    #[test]
    fn validation_errors_keep_their_message() {
        let err = Error::validation("exactly one of selector and volumeGroupContentName");
        assert!(err.to_string().contains("validation error"));
        assert!(err
            .status_message()
            .contains("exactly one of selector and volumeGroupContentName"));
    }

    #[test]
    fn error_construction_ergonomics() {
        let group = "vg-1";
        let err = Error::dependency(format!("volumeGroupClass for {} not found", group));
        assert!(err.to_string().contains("vg-1"));

        match Error::dependency("missing secret") {
            Error::Dependency(msg) => assert_eq!(msg, "missing secret"),
            _ => panic!("expected Dependency variant"),
        }
    }
}
