use anyhow::{Context, Result, bail};
use clap::Parser;
use gce_metadata::{InstanceIdentity, Metadata, MetadataClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

/// CLI tool to read values from the Compute Engine metadata server
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Metadata key relative to computeMetadata/v1 (e.g. "instance/zone")
    key: Option<String>,

    /// Print the resolved project, zone and instance name instead of a single key
    #[clap(short, long)]
    identity: bool,

    /// Override the metadata server base URL
    #[clap(long, default_value = gce_metadata::DEFAULT_ENDPOINT)]
    endpoint: String,
}

/// `RUST_LOG` when set, `info` otherwise. Values go to stdout, logs to stderr.
fn log_filter(env: Option<&str>) -> &str {
    env.map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_LOG_FILTER)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let client = MetadataClient::with_endpoint(&args.endpoint);
    info!("Using metadata server {}", client.endpoint());

    if args.identity {
        let identity = InstanceIdentity::resolve(&client)
            .await
            .context("failed to resolve instance identity")?;
        println!("project:  {}", identity.project);
        println!("zone:     {}", identity.zone);
        println!("instance: {}", identity.instance);
        return Ok(());
    }

    let Some(key) = args.key else {
        bail!("either a metadata key or --identity is required");
    };

    let value = client
        .get(&key)
        .await
        .with_context(|| format!("failed to read metadata key {}", key))?;
    println!("{}", value);

    Ok(())
}
