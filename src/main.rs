use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use cloudfn::{
    config::CloudFunctionsConfig,
    deployer::EXPORTED_COMPONENTS_PREFIX,
    tracing::setup_tracing,
    Deployer,
    ParseStore,
    VersionCache,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "cloudfn")]
#[command(version, about = "Deploy cloud function bundles to the backend store", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Path to config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a function bundle under a new version.
    Deploy {
        /// Runtime tag stored with every chunk.
        #[arg(long)]
        runtime: String,
        /// File holding the serialized bundle.
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        /// Text stored in front of the bundle; pass "" to store it as is.
        #[arg(long, default_value = EXPORTED_COMPONENTS_PREFIX)]
        bundle_prefix: String,
    },
    /// Print the most recently deployed version.
    LatestVersion,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CloudFunctionsConfig::load(cli.config.as_deref())?;

    setup_tracing(&config)?;
    metrics::init_provider(&config.telemetry, &config.instance_id())?;

    let store = Arc::new(ParseStore::new(config.backend.store_config())?);

    match cli.command {
        Command::Deploy {
            runtime,
            file,
            bundle_prefix,
        } => {
            let payload = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read bundle: {}", file.display()))?;
            info!(file = %file.display(), runtime = %runtime, "Deploying bundle");
            let version = Deployer::new(store)
                .with_bundle_prefix(bundle_prefix)
                .deploy(&payload, &runtime)
                .await?;
            println!("{version}");
        }
        Command::LatestVersion => {
            let cache = VersionCache::new(store).with_ttl(config.version_cache_ttl());
            match cache.get_latest_version().await {
                Some(version) => println!("{version}"),
                None => anyhow::bail!("no deployed function version found"),
            }
        }
    }

    Ok(())
}
