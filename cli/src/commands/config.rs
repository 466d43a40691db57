// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use udpfm_core::domain::server_config::ServerConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./udpfm-config.yaml)
        #[arg(short, long, default_value = "./udpfm-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ServerConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        for (i, path) in ServerConfig::search_paths().iter().enumerate() {
            let marker = if path.exists() { "✓".green() } else { " ".normal() };
            println!("  {}. {} {}", i + 2, path.display(), marker);
        }
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Network:".bold());
    println!(
        "  Listen: {}:{}",
        config.network.bind_address, config.network.port
    );
    println!(
        "  Port fallback: {}",
        if config.network.port_fallback { "port + 1" } else { "off" }
    );
    println!("  Max datagram: {} bytes", config.network.max_datagram_bytes);
    println!();

    println!("{}", "Storage:".bold());
    println!("  Managed directory: {}", config.storage.managed_dir.display());
    println!();

    println!("{}", "Execution:".bold());
    println!("  Timeout: {}s", config.execution.timeout_seconds);
    let mut interpreters: Vec<_> = config.execution.interpreters.iter().collect();
    interpreters.sort();
    for (extension, command) in interpreters {
        println!("    {} → {}", extension, command.join(" "));
    }
    println!();

    println!("{}", "Sessions:".bold());
    match config.sessions.idle_timeout_seconds {
        Some(secs) => println!(
            "  Idle timeout: {}s (swept every {}s)",
            secs, config.sessions.sweep_interval_seconds
        ),
        None => println!("  Idle timeout: {}", "disabled".dimmed()),
    }
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        config.observability.logging.level, config.observability.logging.format
    );
    if config.observability.metrics.enabled {
        println!("  Metrics: port {}", config.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ServerConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    if with_examples {
        std::fs::write(&output, include_str!("../../templates/config-with-examples.yaml"))
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    } else {
        ServerConfig::default()
            .to_yaml_file(&output)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    }

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_configs_load_and_validate() {
        let dir = TempDir::new().unwrap();

        let minimal = dir.path().join("minimal.yaml");
        generate(minimal.clone(), false).unwrap();
        ServerConfig::from_yaml_file(&minimal).unwrap().validate().unwrap();

        let annotated = dir.path().join("annotated.yaml");
        generate(annotated.clone(), true).unwrap();
        let config = ServerConfig::from_yaml_file(&annotated).unwrap();
        config.validate().unwrap();
        assert_eq!(config.network.port, 3000);
        assert_eq!(config.execution.interpreters[".py"], vec!["python3".to_string()]);
    }
}
