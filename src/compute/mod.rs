// Compute control-plane access
//
// The orchestrator only talks to the control plane through the `ComputeApi`
// trait. `rest` holds the real implementation against the compute v1 REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClaimError;

mod rest;
pub use rest::RestCompute;

/// Default API host, used both for requests and for disk source URLs.
pub const DEFAULT_API_ENDPOINT: &str = "https://www.googleapis.com";

/// Project and zone every call of one invocation is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub project: String,
    pub zone: String,
}

impl Location {
    pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project, self.zone)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub disks: Vec<AttachedDisk>,
}

impl Instance {
    pub fn has_device(&self, device_name: &str) -> bool {
        self.disks.iter().any(|d| d.device_name == device_name)
    }
}

/// Body of an attachDisk call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDiskSpec {
    pub device_name: String,
    pub source: String,
}

impl AttachedDiskSpec {
    pub fn for_disk(api_endpoint: &str, location: &Location, disk: &str) -> Self {
        Self {
            device_name: disk.to_string(),
            source: disk_source_url(api_endpoint, location, disk),
        }
    }
}

/// Fully qualified resource URL of a zonal disk.
pub fn disk_source_url(api_endpoint: &str, location: &Location, disk: &str) -> String {
    format!(
        "{}/compute/v1/projects/{}/zones/{}/disks/{}",
        api_endpoint.trim_end_matches('/'),
        location.project,
        location.zone,
        disk
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Done,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Error payload of a finished operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub status: OperationStatus,
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The slice of the compute API the claim flow consumes.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Returns `ClaimError::DiskNotFound` when the disk does not exist.
    async fn get_disk(&self, location: &Location, disk: &str) -> Result<Disk, ClaimError>;

    async fn list_instances(&self, location: &Location) -> Result<Vec<Instance>, ClaimError>;

    async fn detach_disk(
        &self,
        location: &Location,
        instance: &str,
        device_name: &str,
    ) -> Result<Operation, ClaimError>;

    async fn attach_disk(
        &self,
        location: &Location,
        instance: &str,
        disk: &AttachedDiskSpec,
    ) -> Result<Operation, ClaimError>;

    async fn get_operation(
        &self,
        location: &Location,
        operation: &str,
    ) -> Result<Operation, ClaimError>;
}

#[cfg(test)]
pub(crate) mod fake;
