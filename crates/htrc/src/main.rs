#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use htrc::config::{AgentConfig, Args};
use htrc::{Tunnel, TunnelEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config: AgentConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let origin = config.origin_url();
    let tunnel = Tunnel::connect(config).await?;
    let mut events = tunnel.events();

    println!("Forwarding {} -> {}", tunnel.url(), origin);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                tunnel.close();
            }
            event = events.recv() => match event {
                Ok(TunnelEvent::Request { method, path, status }) => {
                    info!(%method, %path, status, "proxied");
                }
                Ok(TunnelEvent::Error(e)) => warn!(error = %e, "tunnel error"),
                Ok(TunnelEvent::Closed) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
            }
        }
    }

    info!("agent stopped");
    Ok(())
}
