#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use htrs::config::{Args, RelayConfig};
use htrs::server::{run, RelayState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config: RelayConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let state = Arc::new(RelayState::new(config));

    run(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("relay stopped");
    Ok(())
}
