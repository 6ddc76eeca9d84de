use std::time::Duration;

use gce_metadata::MetadataError;
use thiserror::Error;

/// Failures the claim flow can end in. Call sites add step context with
/// `anyhow::Context`; these variants are what tests and callers match on.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("disk {disk} not found in project {project}, zone {zone}")]
    DiskNotFound {
        disk: String,
        project: String,
        zone: String,
    },

    #[error("instance metadata lookup failed")]
    Metadata(#[from] MetadataError),

    #[error("request to the compute API failed")]
    Transport(#[from] reqwest::Error),

    #[error("compute API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("operation error, see: {operation}")]
    OperationFailed { operation: String },

    #[error("operation {operation} still running after {waited:?}")]
    Timeout { operation: String, waited: Duration },
}

impl ClaimError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClaimError::Validation(message.into())
    }
}

/// Finds the typed cause inside a context-wrapped error chain.
pub fn claim_error(err: &anyhow::Error) -> Option<&ClaimError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ClaimError>())
}
