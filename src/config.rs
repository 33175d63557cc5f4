use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::IpMode;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub integration_name: String,
    pub integration_name_short: String,
    /// Id of the agent's own container, when already known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub default_ip_mode: IpMode,
    /// Forces an ip mode for every directive; ignored unless it names a known mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_ip_mode: Option<String>,
    pub command_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_api_version: Option<String>,
    pub docker_socket: String,
    pub docker_binaries: Vec<String>,
    pub proc_root: String,
    pub template_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            integration_name: "nri-flex".into(),
            integration_name_short: "flex".into(),
            container_id: None,
            default_ip_mode: IpMode::Private,
            override_ip_mode: None,
            command_timeout_ms: 10_000,
            docker_api_version: None,
            docker_socket: "/var/run/docker.sock".into(),
            docker_binaries: vec!["docker".into(), "/host/usr/local/bin/docker".into()],
            proc_root: "/host/proc".into(),
            template_dir: PathBuf::from("flexContainerDiscovery"),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("flexdisco.toml"))
                .merge(Json::file("flexdisco.json"))
                .merge(Env::prefixed("FLEXDISCO_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Empty strings from the environment mean "not set"
        config.container_id = config.container_id.filter(|id| !id.is_empty());
        config.docker_api_version = config.docker_api_version.filter(|v| !v.is_empty());

        Ok(config)
    }

    /// Engine-facing view of the configuration.
    pub fn settings(&self) -> DiscoverySettings {
        let override_ip_mode = self
            .override_ip_mode
            .as_deref()
            .and_then(|mode| mode.parse().ok());
        DiscoverySettings {
            integration_name: self.integration_name.clone(),
            integration_name_short: self.integration_name_short.clone(),
            default_ip_mode: self.default_ip_mode,
            override_ip_mode,
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            proc_root: self.proc_root.clone(),
        }
    }
}

/// Immutable settings shared by every task of a discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub integration_name: String,
    pub integration_name_short: String,
    pub default_ip_mode: IpMode,
    pub override_ip_mode: Option<IpMode>,
    pub command_timeout: Duration,
    pub proc_root: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Config::default().settings()
    }
}
