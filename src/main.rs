use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gce_disk_claim::HolderPolicy;
use gce_disk_claim::cli::{self, CommonArgs, Variant};

/// Attach a persistent disk to this instance, detaching it from its current holder first
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(flatten)]
    common: CommonArgs,

    /// Mount path to record for the disk (not used to decide anything)
    #[clap(long)]
    path: Option<PathBuf>,

    /// Return as soon as the control plane accepts each call
    #[clap(long)]
    no_wait: bool,

    /// Detach and re-attach even when this instance already holds the disk
    #[clap(long)]
    always_reattach: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let variant = Variant {
        wait_for_completion: !args.no_wait,
        holder_policy: if args.always_reattach {
            HolderPolicy::Reattach
        } else {
            HolderPolicy::SkipIfHeld
        },
        ..Variant::SYNC
    };

    cli::execute(args.common, args.path, variant).await
}
