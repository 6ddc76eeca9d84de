// Glue shared by the claim binaries: flags, settings, logging, and wiring
// the metadata and compute clients into the orchestrator.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use gce_metadata::{InstanceIdentity, MetadataClient};
use tracing::{error, info};

use crate::compute::{Location, RestCompute};
use crate::config::{Settings, validate_disk_name, validate_mount_path};
use crate::error::ClaimError;
use crate::logging;
use crate::orchestrator::{ClaimConfig, ClaimReport, HolderPolicy, Orchestrator};

/// Flags understood by every claim binary.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Name of the disk to attach to this instance
    #[clap(long)]
    pub disk: Option<String>,

    /// Settings file (TOML); defaults to settings.toml in the user config directory
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seconds between operation status polls
    #[clap(long, value_name = "SECONDS")]
    pub poll_interval: Option<u64>,

    /// Give up waiting for an operation after this many seconds
    #[clap(long, value_name = "SECONDS")]
    pub max_wait: Option<u64>,

    /// Log filter, e.g. "debug" or "gce_disk_claim=trace"
    #[clap(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the claim report as JSON on stdout
    #[clap(long)]
    pub json: bool,
}

/// The behavioural knobs that distinguish the two binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    pub wait_for_completion: bool,
    pub holder_policy: HolderPolicy,
    pub mount_path_required: bool,
}

impl Variant {
    /// Wait for every operation; leave an already correct attachment alone.
    pub const SYNC: Variant = Variant {
        wait_for_completion: true,
        holder_policy: HolderPolicy::SkipIfHeld,
        mount_path_required: false,
    };

    /// Issue the calls and return; always cycle the attachment.
    pub const NO_WAIT: Variant = Variant {
        wait_for_completion: false,
        holder_policy: HolderPolicy::Reattach,
        mount_path_required: true,
    };
}

/// Flags checked before anything touches the network.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    pub disk: String,
    pub mount_path: Option<PathBuf>,
}

impl ClaimRequest {
    pub fn from_flags(
        disk: Option<&str>,
        mount_path: Option<PathBuf>,
        variant: Variant,
    ) -> Result<Self, ClaimError> {
        let disk = disk.unwrap_or_default().trim().to_string();
        validate_disk_name(&disk)?;

        match &mount_path {
            Some(path) => validate_mount_path(path)?,
            None if variant.mount_path_required => {
                return Err(ClaimError::validation("--path flag is required"));
            }
            None => {}
        }

        Ok(Self { disk, mount_path })
    }
}

/// Entry point of both binaries. Failures are logged once, with their full
/// cause chain, and turned into a non-zero exit code.
pub async fn execute(args: CommonArgs, mount_path: Option<PathBuf>, variant: Variant) -> ExitCode {
    let settings = Settings::load(args.config.as_deref());
    let file_filter = settings.as_ref().ok().and_then(|s| s.log_filter.clone());
    let _log_guard = match logging::init(
        args.log_level.as_deref(),
        file_filter.as_deref(),
        args.log_file.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    let result: Result<()> = async {
        let settings = settings?;
        let request = ClaimRequest::from_flags(args.disk.as_deref(), mount_path, variant)?;
        let report = claim(&args, &settings, request, variant).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:?}", err);
            ExitCode::FAILURE
        }
    }
}

async fn claim(
    args: &CommonArgs,
    settings: &Settings,
    request: ClaimRequest,
    variant: Variant,
) -> Result<ClaimReport> {
    info!("[*] Attaching disk {} to the instance...", request.disk);

    let metadata = Arc::new(MetadataClient::with_endpoint(&settings.metadata_endpoint));

    info!("Reading instance metadata...");
    let identity = InstanceIdentity::resolve(metadata.as_ref())
        .await
        .context("failed to read instance metadata")?;
    info!(
        "Running as {} in project {}, zone {}",
        identity.instance, identity.project, identity.zone
    );

    let compute = RestCompute::new(&settings.api_endpoint, metadata);
    let config = ClaimConfig {
        disk: request.disk,
        claimant: identity.instance,
        location: Location::new(identity.project, identity.zone),
        api_endpoint: compute.endpoint().to_string(),
        mount_path: request.mount_path,
        wait_for_completion: variant.wait_for_completion,
        holder_policy: variant.holder_policy,
        wait: settings.wait_policy(args.poll_interval, args.max_wait),
    };

    let report = Orchestrator::new(&compute, config).run().await?;
    info!("[*] Disk {} attached successfully!", report.disk);
    Ok(report)
}
