// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # udpfm
//!
//! A file manager served over UDP. One binary runs both sides:
//!
//! - `udpfm serve` - run the server in the foreground
//! - `udpfm connect` - interactive client
//! - `udpfm config show|validate|generate` - configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use udpfm_cli::commands::{self, ConfigCommand, ConnectArgs, ServeArgs};
use udpfm_core::domain::server_config::ServerConfig;

/// udpfm - role-based file manager over UDP
#[derive(Parser)]
#[command(name = "udpfm")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "UDPFM_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "UDPFM_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Connect to a server interactively
    #[command(name = "connect")]
    Connect(ConnectArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => {
            let config = ServerConfig::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            let level = cli
                .log_level
                .unwrap_or_else(|| config.observability.logging.level.clone());
            init_logging(&level, &config.observability.logging.format)?;
            commands::serve::run(args, config).await
        }
        Some(Commands::Connect(args)) => {
            // Log lines would interleave with the prompt; keep them quiet by default.
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;
            commands::connect::run(args).await
        }
        Some(Commands::Config { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
