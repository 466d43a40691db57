// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Server Configuration Types
//
// Defines the YAML configuration schema for a udpfm server:
// - UDP bind address, port and fallback policy
// - Managed directory location
// - Process execution limits and interpreter table
// - Optional idle-session reaping
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::process::{default_interpreters, InterpreterTable};

/// Largest UDP payload that fits a single IPv4 datagram.
pub const MAX_UDP_PAYLOAD_BYTES: usize = 65_507;

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP socket settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Managed directory settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Child process settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// UDP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Retry once on `port + 1` when the port is already in use
    #[serde(default = "default_true")]
    pub port_fallback: bool,

    /// Largest datagram the server will send; bigger replies become an error
    #[serde(default = "default_max_datagram_bytes")]
    pub max_datagram_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sandbox root for every file operation. Created at startup if absent.
    #[serde(default = "default_managed_dir")]
    pub managed_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock limit for a spawned process
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Maximum bytes read from a child's stdout/stderr per forwarded chunk
    #[serde(default = "default_output_chunk_bytes")]
    pub output_chunk_bytes: usize,

    /// Extension (with leading dot) → interpreter command line
    #[serde(default = "default_interpreters")]
    pub interpreters: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Reap sessions that have sent nothing for this long. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_seconds: Option<u64>,

    /// How often the idle sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Expose a Prometheus endpoint
    #[serde(default)]
    pub enabled: bool,

    /// Metrics endpoint port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_datagram_bytes() -> usize {
    MAX_UDP_PAYLOAD_BYTES
}

fn default_managed_dir() -> PathBuf {
    PathBuf::from("./managed_files")
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_output_chunk_bytes() -> usize {
    8 * 1024
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            port_fallback: true,
            max_datagram_bytes: default_max_datagram_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            managed_dir: default_managed_dir(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            output_chunk_bytes: default_output_chunk_bytes(),
            interpreters: default_interpreters(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: None,
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate configuration paths in precedence order
    /// 1. UDPFM_CONFIG_PATH environment variable
    /// 2. ./udpfm-config.yaml (working directory)
    /// 3. ~/.udpfm/config.yaml (user home)
    /// 4. /etc/udpfm/config.yaml (system, Unix)
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("UDPFM_CONFIG_PATH") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./udpfm-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".udpfm").join("config.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/udpfm/config.yaml"));
        paths
    }

    /// First existing file among [`ServerConfig::search_paths`]
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|p| p.exists())
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // 1. Explicit CLI path (Fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        // 2. Discovery (Env -> Cwd -> Home -> System)
        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the variable source
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("UDPFM_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: UDPFM_PORT={}", port);
                    self.network.port = port;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for UDPFM_PORT: '{}'. Expected a port number. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("UDPFM_BIND_ADDRESS") {
            tracing::info!("Environment override: UDPFM_BIND_ADDRESS={}", val);
            self.network.bind_address = val;
        }

        if let Some(val) = lookup("UDPFM_MANAGED_DIR") {
            tracing::info!("Environment override: UDPFM_MANAGED_DIR={}", val);
            self.storage.managed_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("UDPFM_EXEC_TIMEOUT_SECONDS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: UDPFM_EXEC_TIMEOUT_SECONDS={}", secs);
                    self.execution.timeout_seconds = secs;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for UDPFM_EXEC_TIMEOUT_SECONDS: '{}'. Expected seconds. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network.bind_address.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!(
                "network.bind_address '{}' is not an IP address",
                self.network.bind_address
            );
        }

        if self.network.max_datagram_bytes == 0
            || self.network.max_datagram_bytes > MAX_UDP_PAYLOAD_BYTES
        {
            anyhow::bail!(
                "network.max_datagram_bytes must be between 1 and {}",
                MAX_UDP_PAYLOAD_BYTES
            );
        }

        if self.storage.managed_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.managed_dir cannot be empty");
        }

        if self.execution.timeout_seconds == 0 {
            anyhow::bail!("execution.timeout_seconds must be greater than zero");
        }

        if self.execution.output_chunk_bytes == 0 {
            anyhow::bail!("execution.output_chunk_bytes must be greater than zero");
        }

        for (extension, command) in &self.execution.interpreters {
            if !extension.starts_with('.') || extension.len() < 2 {
                anyhow::bail!(
                    "execution.interpreters key '{}' must be an extension like '.py'",
                    extension
                );
            }
            if command.first().map_or(true, |program| program.trim().is_empty()) {
                anyhow::bail!(
                    "execution.interpreters['{}'] must name a program",
                    extension
                );
            }
        }

        if self.sessions.idle_timeout_seconds == Some(0) {
            anyhow::bail!("sessions.idle_timeout_seconds must be greater than zero when set");
        }

        if self.sessions.sweep_interval_seconds == 0 {
            anyhow::bail!("sessions.sweep_interval_seconds must be greater than zero");
        }

        if !matches!(self.observability.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "observability.logging.format must be 'text' or 'json', got '{}'",
                self.observability.logging.format
            );
        }

        Ok(())
    }

    pub fn interpreter_table(&self) -> InterpreterTable {
        InterpreterTable::new(self.execution.interpreters.clone())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.sessions.idle_timeout_seconds.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.network.port, 3000);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert!(config.network.port_fallback);
        assert_eq!(config.execution.timeout_seconds, 300);
        assert!(config.sessions.idle_timeout_seconds.is_none());
        assert_eq!(config.storage.managed_dir, PathBuf::from("./managed_files"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = ServerConfig::from_yaml_str(
            r#"
network:
  port: 4100
execution:
  timeout_seconds: 5
  interpreters:
    ".sh": ["sh"]
sessions:
  idle_timeout_seconds: 600
"#,
        )
        .unwrap();

        assert_eq!(config.network.port, 4100);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.execution.output_chunk_bytes, 8192);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(600)));
        assert!(config
            .interpreter_table()
            .supports(Path::new("/tmp/x.sh")));
        assert!(!config
            .interpreter_table()
            .supports(Path::new("/tmp/x.py")));
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = ServerConfig::default();
        config.sessions.idle_timeout_seconds = Some(120);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = ServerConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.sessions.idle_timeout_seconds, Some(120));
        assert_eq!(parsed.execution.interpreters, config.execution.interpreters);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config.apply_overrides_from(|key| match key {
            "UDPFM_PORT" => Some("4000".to_string()),
            "UDPFM_MANAGED_DIR" => Some("/srv/files".to_string()),
            "UDPFM_EXEC_TIMEOUT_SECONDS" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.network.port, 4000);
        assert_eq!(config.storage.managed_dir, PathBuf::from("/srv/files"));
        assert_eq!(config.execution.timeout_seconds, 300);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.execution.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.network.max_datagram_bytes = 70_000;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config
            .execution
            .interpreters
            .insert("sh".to_string(), vec!["sh".to_string()]);
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.execution.interpreters.insert(".rb".to_string(), vec![]);
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.network.bind_address = "localhost".to_string();
        assert!(config.validate().is_err());
    }
}
