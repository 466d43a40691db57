// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `udpfm serve`: run the UDP file manager server in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use udpfm_core::domain::server_config::ServerConfig;
use udpfm_core::infrastructure::telemetry;
use udpfm_core::presentation::udp::{shutdown_signal, UdpServer};

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind (overrides network.bind_address)
    #[arg(long, env = "UDPFM_HOST")]
    pub host: Option<String>,

    /// UDP port (overrides network.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Managed directory (overrides storage.managed_dir)
    #[arg(long, value_name = "DIR")]
    pub managed_dir: Option<PathBuf>,

    /// Drop sessions silent for this many seconds
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Do not retry on port + 1 when the port is taken
    #[arg(long)]
    pub no_port_fallback: bool,
}

impl ServeArgs {
    /// Layer command-line flags over the loaded configuration.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.network.bind_address = host.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(dir) = &self.managed_dir {
            config.storage.managed_dir = dir.clone();
        }
        if let Some(secs) = self.idle_timeout {
            config.sessions.idle_timeout_seconds = Some(secs);
        }
        if self.no_port_fallback {
            config.network.port_fallback = false;
        }
    }
}

pub async fn run(args: ServeArgs, config: ServerConfig) -> Result<()> {
    let mut config = config;
    args.apply(&mut config);

    let metrics_addr = telemetry::install(
        &config.observability.metrics,
        &config.network.bind_address,
    )
    .context("Failed to start metrics exporter")?;

    let server = UdpServer::bind(config).await?;
    let addr = server
        .local_addr()
        .context("Failed to read bound address")?;

    println!("{}", "udpfm server".bold());
    println!("  Listening on {}", addr.to_string().green());
    println!(
        "  Managed directory: {}",
        server.dispatcher().files().root().display()
    );
    if let Some(metrics) = metrics_addr {
        println!("  Metrics: http://{}/metrics", metrics);
    }
    println!("  Press Ctrl+C to stop");
    println!();

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    server.run(shutdown).await?;
    info!("Server exited cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = ServerConfig::default();
        let args = ServeArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(4100),
            managed_dir: Some(PathBuf::from("/srv/udpfm")),
            idle_timeout: Some(60),
            no_port_fallback: true,
        };
        args.apply(&mut config);

        assert_eq!(config.network.bind_address, "127.0.0.1");
        assert_eq!(config.network.port, 4100);
        assert_eq!(config.storage.managed_dir, PathBuf::from("/srv/udpfm"));
        assert_eq!(config.sessions.idle_timeout_seconds, Some(60));
        assert!(!config.network.port_fallback);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut config = ServerConfig::default();
        ServeArgs::default().apply(&mut config);
        assert_eq!(config.network.port, 3000);
        assert!(config.network.port_fallback);
    }
}
