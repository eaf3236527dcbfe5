//! antfarm - run a local fleet of blockchain nodes under synthetic load.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

use anyhow::{Context, Result};
use antfarm::{Antfarm, AntfarmConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

mod logging;

#[derive(Parser)]
#[command(
    name = "antfarm",
    about = "Spawn, connect and exercise a farm of blockchain full nodes",
    version,
    author
)]
struct Cli {
    /// Farm config file (.json, .yaml or .yml)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Control surface of another farm to join (repeatable)
    #[arg(long = "connect", value_name = "ADDR")]
    connect: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let mut config = AntfarmConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.external_farms.extend(cli.connect);

    info!(
        config = %cli.config.display(),
        ants = config.ant_configs.len(),
        "starting antfarm"
    );
    let farm = Antfarm::create(config)
        .await
        .context("failed to create antfarm")?;
    info!(listen = %farm.listen_addr(), "antfarm running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("could not listen for Ctrl-C: {e}");
    }

    info!("shutting down antfarm");
    farm.close().await;
    Ok(())
}
