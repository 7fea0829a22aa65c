//! Daemon configuration.
//!
//! Settings layer, lowest priority first:
//!
//! 1. built-in defaults from [`crate::constants`]
//! 2. the config file (`~/.vord/vord.toml`, or `--config <path>`)
//! 3. `ORCH_*` environment variables
//!
//! The file also carries the binding directory: named upstream servers and
//! the bindings (credential + server) workers may be started against.
//!
//! # Example Configuration
//!
//! ```toml
//! [daemon]
//! port = 9190
//!
//! [[servers]]
//! name = "idv-primary"
//! base_url = "http://10.0.0.12:8088"
//! timeout_ms = 10000
//!
//! [[bindings]]
//! id = 1
//! credential = "628123456789"
//! server = "idv-primary"
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::provider::ServerEndpoint;
use crate::registry::BindingId;

/// One binding the daemon may drive: a credential pinned to a server.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingEntry {
    pub id: u64,
    pub credential: String,
    /// Name of a `[[servers]]` entry.
    pub server: String,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct OrchConfig {
    pub api_port: u16,
    pub registry_path: PathBuf,
    pub audit_path: PathBuf,
    pub worker_interval_ms_default: u64,
    pub max_concurrent_calls: usize,
    pub max_concurrent_per_server: usize,
    pub lock_ttl_ms: u64,
    pub heartbeat_ms: u64,
    pub otp_timeout_ms: u64,
    pub servers: Vec<ServerEndpoint>,
    pub bindings: Vec<BindingEntry>,
}

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    daemon: DaemonSection,
    orchestration: OrchestrationSection,
    servers: Vec<ServerSection>,
    bindings: Vec<BindingEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DaemonSection {
    port: Option<u16>,
    registry_path: Option<PathBuf>,
    audit_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OrchestrationSection {
    worker_interval_ms_default: Option<u64>,
    max_concurrent_calls: Option<usize>,
    max_concurrent_per_server: Option<usize>,
    lock_ttl_ms: Option<u64>,
    heartbeat_ms: Option<u64>,
    otp_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    name: String,
    base_url: String,
    #[serde(default = "default_server_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_server_retries")]
    retries: u32,
    #[serde(default = "default_server_backoff_ms")]
    backoff_ms: u64,
}

const fn default_server_timeout_ms() -> u64 {
    constants::DEFAULT_PROVIDER_TIMEOUT_MS
}

const fn default_server_retries() -> u32 {
    constants::DEFAULT_PROVIDER_RETRIES
}

const fn default_server_backoff_ms() -> u64 {
    constants::DEFAULT_PROVIDER_BACKOFF_MS
}

// =============================================================================
// Loading
// =============================================================================

impl OrchConfig {
    /// Load configuration from the given path (or the default location),
    /// apply `ORCH_*` overrides, and validate.
    pub fn load(explicit_path: Option<&Path>, port_flag: Option<u16>) -> Result<Self> {
        let path = match explicit_path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_config_path().ok().filter(|path| path.exists()),
        };

        let file = match &path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;
                toml::from_str::<FileConfig>(&content)
                    .with_context(|| format!("Failed to parse config from {}", path.display()))?
            }
            None => {
                tracing::debug!("no config file found, using defaults");
                FileConfig::default()
            }
        };

        let data_dir = Self::default_data_dir()?;
        let mut config = Self {
            api_port: port_flag
                .or(file.daemon.port)
                .unwrap_or(constants::DEFAULT_API_PORT),
            registry_path: file
                .daemon
                .registry_path
                .unwrap_or_else(|| data_dir.join("registry.redb")),
            audit_path: file
                .daemon
                .audit_path
                .unwrap_or_else(|| data_dir.join("audit.redb")),
            worker_interval_ms_default: file
                .orchestration
                .worker_interval_ms_default
                .unwrap_or(constants::DEFAULT_WORKER_INTERVAL_MS),
            max_concurrent_calls: file
                .orchestration
                .max_concurrent_calls
                .unwrap_or(constants::DEFAULT_MAX_CONCURRENT_CALLS),
            max_concurrent_per_server: file
                .orchestration
                .max_concurrent_per_server
                .unwrap_or(constants::DEFAULT_MAX_CONCURRENT_PER_SERVER),
            lock_ttl_ms: file
                .orchestration
                .lock_ttl_ms
                .unwrap_or(constants::DEFAULT_LOCK_TTL_MS),
            heartbeat_ms: file
                .orchestration
                .heartbeat_ms
                .unwrap_or(constants::DEFAULT_HEARTBEAT_MS),
            otp_timeout_ms: file
                .orchestration
                .otp_timeout_ms
                .unwrap_or(constants::DEFAULT_OTP_TIMEOUT_MS),
            servers: file
                .servers
                .into_iter()
                .map(|server| ServerEndpoint {
                    name: server.name,
                    base_url: server.base_url,
                    timeout_ms: server.timeout_ms,
                    retries: server.retries,
                    backoff_ms: server.backoff_ms,
                })
                .collect(),
            bindings: file.bindings,
        };

        config.apply_env()?;
        config.validate()?;

        tracing::info!(
            port = config.api_port,
            servers = config.servers.len(),
            bindings = config.bindings.len(),
            lock_ttl_ms = config.lock_ttl_ms,
            "loaded configuration"
        );
        Ok(config)
    }

    /// Overlay recognized `ORCH_*` environment variables.
    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_u64("ORCH_WORKER_INTERVAL_MS_DEFAULT")? {
            self.worker_interval_ms_default = value;
        }
        if let Some(value) = env_u64("ORCH_MAX_CONCURRENT_CALLS")? {
            self.max_concurrent_calls = value as usize;
        }
        if let Some(value) = env_u64("ORCH_MAX_CONCURRENT_PER_SERVER")? {
            self.max_concurrent_per_server = value as usize;
        }
        if let Some(value) = env_u64("ORCH_LOCK_TTL_MS")? {
            self.lock_ttl_ms = value;
        }
        if let Some(value) = env_u64("ORCH_HEARTBEAT_MS")? {
            self.heartbeat_ms = value;
        }
        if let Some(value) = env_u64("ORCH_OTP_TIMEOUT_MS")? {
            self.otp_timeout_ms = value;
        }
        Ok(())
    }

    /// Reject configurations a running daemon could not honor.
    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.max_concurrent_calls == 0 {
            problems.push("max_concurrent_calls must be at least 1".to_string());
        }
        if self.max_concurrent_per_server == 0 {
            problems.push("max_concurrent_per_server must be at least 1".to_string());
        }
        if self.lock_ttl_ms == 0 {
            problems.push("lock_ttl_ms must be positive".to_string());
        }
        if !(constants::MIN_WORKER_INTERVAL_MS..=constants::MAX_WORKER_INTERVAL_MS)
            .contains(&self.worker_interval_ms_default)
        {
            problems.push(format!(
                "worker_interval_ms_default must be {}..={}",
                constants::MIN_WORKER_INTERVAL_MS,
                constants::MAX_WORKER_INTERVAL_MS
            ));
        }

        let mut server_names = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                problems.push("server name must not be empty".to_string());
            }
            if !server_names.insert(server.name.as_str()) {
                problems.push(format!("duplicate server name '{}'", server.name));
            }
            if server.base_url.is_empty() {
                problems.push(format!("server '{}' has an empty base_url", server.name));
            }
        }

        let mut binding_ids = HashSet::new();
        for binding in &self.bindings {
            if !binding_ids.insert(binding.id) {
                problems.push(format!("duplicate binding id {}", binding.id));
            }
            if binding.credential.is_empty() {
                problems.push(format!("binding {} has an empty credential", binding.id));
            }
            if !server_names.contains(binding.server.as_str()) {
                problems.push(format!(
                    "binding {} references unknown server '{}'",
                    binding.id, binding.server
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            bail!("invalid configuration:\n  - {}", problems.join("\n  - "))
        }
    }

    /// Resolve a binding id to its credential and server endpoint.
    pub fn binding_profile(&self, id: BindingId) -> Option<(&BindingEntry, &ServerEndpoint)> {
        let binding = self.bindings.iter().find(|binding| binding.id == id.0)?;
        let server = self
            .servers
            .iter()
            .find(|server| server.name == binding.server)?;
        Some((binding, server))
    }

    /// Default config file location: `~/.vord/vord.toml`.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_data_dir()?.join("vord.toml"))
    }

    fn default_data_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".vord"))
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse::<u64>()
                .with_context(|| format!("{name} must be an integer, got '{raw}'"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}
