use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gce_disk_claim::cli::{self, CommonArgs, Variant};

/// Move a persistent disk to this instance without waiting for the operations to finish
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(flatten)]
    common: CommonArgs,

    /// Where the disk will be mounted inside this instance
    #[clap(long)]
    path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    cli::execute(args.common, args.path, Variant::NO_WAIT).await
}
