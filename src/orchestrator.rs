// Attachment orchestration
//
// Brings the attachment of one disk to the state "attached to the claiming
// instance" with as few control-plane mutations as possible:
//
//   holder   | holder vs claimant | action
//   ---------+--------------------+---------------------------------
//   none     |                    | attach
//   X        | X == claimant      | nothing, or detach + attach when
//            |                    | the policy asks to re-attach
//   X        | X != claimant      | detach from X, then attach
//
// Nothing is rolled back. A failed attach after a successful detach leaves
// the disk unattached, which is logged as its own outcome.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::compute::{AttachedDiskSpec, ComputeApi, Location, Operation};
use crate::config::{validate_disk_name, validate_mount_path};
use crate::error::ClaimError;
use crate::waiter::{OperationWaiter, WaitPolicy};

/// What to do when the claiming instance already holds the disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HolderPolicy {
    #[default]
    SkipIfHeld,
    Reattach,
}

/// Everything one claim needs, resolved before any network call.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    pub disk: String,
    pub claimant: String,
    pub location: Location,
    pub api_endpoint: String,
    /// Recorded for the in-instance mount step, never used for decisions.
    pub mount_path: Option<PathBuf>,
    pub wait_for_completion: bool,
    pub holder_policy: HolderPolicy,
    pub wait: WaitPolicy,
}

impl ClaimConfig {
    pub fn validate(&self) -> Result<(), ClaimError> {
        validate_disk_name(&self.disk)?;
        if let Some(path) = &self.mount_path {
            validate_mount_path(path)?;
        }
        if self.claimant.is_empty() {
            return Err(ClaimError::validation("claiming instance name is empty"));
        }
        if self.wait.interval.is_zero() {
            return Err(ClaimError::validation("poll interval must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Plan {
    /// Nobody holds the disk.
    Attach,
    /// The claimant already holds the disk.
    Keep,
    /// Detach from `from` (possibly the claimant itself), then attach.
    Move { from: String },
}

pub fn plan(holder: Option<&str>, claimant: &str, policy: HolderPolicy) -> Plan {
    match holder {
        None => Plan::Attach,
        Some(current) if current == claimant && policy == HolderPolicy::SkipIfHeld => Plan::Keep,
        Some(current) => Plan::Move {
            from: current.to_string(),
        },
    }
}

/// Outcome of a successful claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimReport {
    pub disk: String,
    pub claimant: String,
    pub location: Location,
    pub previous_holder: Option<String>,
    pub plan: Plan,
    pub operations: Vec<String>,
    /// False when operations were issued without waiting for them.
    pub confirmed: bool,
    pub mount_path: Option<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

impl ClaimReport {
    pub fn summary(&self) -> String {
        let action = match &self.plan {
            Plan::Attach => format!("attached to {}", self.claimant),
            Plan::Keep => format!("already attached to {}", self.claimant),
            Plan::Move { from } => format!("moved from {} to {}", from, self.claimant),
        };
        let confirmation = if self.confirmed { "" } else { " (not confirmed)" };
        format!("disk {} {}{}", self.disk, action, confirmation)
    }
}

pub struct Orchestrator<'a, C: ComputeApi + ?Sized> {
    compute: &'a C,
    config: ClaimConfig,
}

impl<'a, C: ComputeApi + ?Sized> Orchestrator<'a, C> {
    pub fn new(compute: &'a C, config: ClaimConfig) -> Self {
        Self { compute, config }
    }

    pub async fn run(&self) -> Result<ClaimReport> {
        let config = &self.config;
        config.validate()?;

        info!(
            "Claiming disk {} for instance {} in {}",
            config.disk, config.claimant, config.location
        );
        if let Some(path) = &config.mount_path {
            info!("Mount path for disk {}: {}", config.disk, path.display());
        }

        let locator = crate::locator::DiskLocator::new(self.compute, &config.location);

        info!("Checking disk {} exists...", config.disk);
        locator
            .ensure_exists(&config.disk)
            .await
            .with_context(|| format!("failed to look up disk {}", config.disk))?;

        info!("Looking for an instance holding disk {}...", config.disk);
        let holder = locator
            .current_holder(&config.disk)
            .await
            .with_context(|| format!("failed to find the holder of disk {}", config.disk))?;

        let plan = plan(holder.as_deref(), &config.claimant, config.holder_policy);
        debug!("Holder {:?}, plan {:?}", holder, plan);

        let mut operations = Vec::new();
        match &plan {
            Plan::Keep => {
                info!("Disk {} is already attached to this instance", config.disk);
            }
            Plan::Attach => {
                operations.push(self.attach().await?);
            }
            Plan::Move { from } => {
                operations.push(self.detach(from).await?);
                match self.attach().await {
                    Ok(name) => operations.push(name),
                    Err(err) => {
                        error!(
                            "Disk {} was detached from {} but could not be attached to {}; it is now attached to no instance",
                            config.disk, from, config.claimant
                        );
                        return Err(err.context(format!(
                            "disk {} left unattached after detaching it from {}",
                            config.disk, from
                        )));
                    }
                }
            }
        }

        let confirmed = config.wait_for_completion || operations.is_empty();
        let report = ClaimReport {
            disk: config.disk.clone(),
            claimant: config.claimant.clone(),
            location: config.location.clone(),
            previous_holder: holder,
            plan,
            operations,
            confirmed,
            mount_path: config.mount_path.clone(),
            finished_at: Utc::now(),
        };
        info!("Done: {}", report.summary());
        Ok(report)
    }

    async fn detach(&self, from: &str) -> Result<String> {
        let config = &self.config;
        info!("Detaching disk {} from instance {}...", config.disk, from);

        let context = || format!("failed to detach disk {} from {}", config.disk, from);
        let operation = self
            .compute
            .detach_disk(&config.location, from, &config.disk)
            .await
            .with_context(context)?;
        self.settle(&operation).await.with_context(context)?;

        Ok(operation.name)
    }

    async fn attach(&self) -> Result<String> {
        let config = &self.config;
        info!("Attaching disk {} to instance {}...", config.disk, config.claimant);

        let spec = AttachedDiskSpec::for_disk(&config.api_endpoint, &config.location, &config.disk);
        let context = || format!("failed to attach disk {} to {}", config.disk, config.claimant);
        let operation = self
            .compute
            .attach_disk(&config.location, &config.claimant, &spec)
            .await
            .with_context(context)?;
        self.settle(&operation).await.with_context(context)?;

        Ok(operation.name)
    }

    async fn settle(&self, operation: &Operation) -> Result<(), ClaimError> {
        if !self.config.wait_for_completion {
            debug!("Not waiting for operation {}", operation.name);
            return Ok(());
        }

        OperationWaiter::new(self.compute, self.config.wait)
            .wait(&self.config.location, &operation.name)
            .await
            .map(|_| ())
    }
}
