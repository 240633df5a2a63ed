//! Listener settings at `~/.border0/listener.toml`.
//!
//! Every key in the `[listener]` section is optional. CLI flags always
//! override file values.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use border0_client::ListenerConfig;
use border0_core::SocketType;

use crate::Cli;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerSection {
    pub socket_name: Option<String>,
    pub socket_type: Option<SocketType>,
    pub token: Option<String>,
    #[serde(default)]
    pub policies: Vec<String>,
    pub control_endpoint: Option<String>,
    pub api_url: Option<String>,
    pub queue_depth: Option<usize>,
    pub insecure: Option<bool>,
}

pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".border0")
        .join("listener.toml")
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// File values first, then flags on top. Validates the result.
pub fn merge(cli: &Cli, file: ListenerSection) -> Result<ListenerConfig> {
    let mut cfg = ListenerConfig::new(
        cli.socket_name
            .clone()
            .or(file.socket_name)
            .unwrap_or_default(),
    );
    cfg.socket_type = cli.socket_type.or(file.socket_type).unwrap_or_default();
    cfg.auth_token = cli.token.clone().or(file.token);

    let policies = if cli.policies.is_empty() {
        file.policies
    } else {
        cli.policies.clone()
    };
    cfg.policy_names = policies.into_iter().collect();

    if let Some(endpoint) = cli.control_endpoint.clone().or(file.control_endpoint) {
        cfg.control_endpoint = endpoint;
    }
    if let Some(url) = cli.api_url.clone().or(file.api_url) {
        cfg.api_url = url;
    }
    if let Some(depth) = cli.queue_depth.or(file.queue_depth) {
        cfg.accept_queue_depth = depth;
    }
    cfg.insecure_transport = cli.insecure || file.insecure.unwrap_or(false);

    cfg.validate().context("invalid listener configuration")?;
    Ok(cfg)
}
