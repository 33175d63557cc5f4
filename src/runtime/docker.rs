use super::ContainerRuntime;
use crate::config::Config;
use crate::error::DiscoveryError;
use crate::types::{ContainerInspection, ContainerSnapshot, PortMapping};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::{ClientVersion, Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::{debug, info};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Seconds the Docker client waits on a request.
const CLIENT_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon.
    ///
    /// An explicitly configured API version is always pinned.  Otherwise
    /// the docker CLI is asked for its client API version, which is
    /// pinned when bollard supports it; anything else falls back to the
    /// library default.
    pub async fn connect(cfg: &Config) -> Result<Self, DiscoveryError> {
        if let Some(version) = &cfg.docker_api_version {
            let pinned = parse_api_version(version)
                .ok_or_else(|| DiscoveryError::ApiVersion(version.clone()))?;
            info!("Using pinned Docker API version {}", version);
            return Self::connect_pinned(cfg, &pinned);
        }

        let timeout = Duration::from_millis(cfg.command_timeout_ms);
        match query_client_api_version(&cfg.docker_binaries, timeout).await {
            Some(detected) if version_tuple(&detected) <= version_tuple(API_DEFAULT_VERSION) => {
                debug!(
                    "Setting client with version: {}.{}",
                    detected.major_version, detected.minor_version
                );
                Self::connect_pinned(cfg, &detected)
            }
            Some(detected) => {
                debug!(
                    "Client API version {}.{} is higher than supported {}.{}, using defaults",
                    detected.major_version,
                    detected.minor_version,
                    API_DEFAULT_VERSION.major_version,
                    API_DEFAULT_VERSION.minor_version
                );
                Self::connect_defaults()
            }
            None => {
                debug!("Unable to fetch Docker API version, using defaults");
                Self::connect_defaults()
            }
        }
    }

    fn connect_defaults() -> Result<Self, DiscoveryError> {
        // Connect to the local Docker daemon using default settings.
        // This handles unix socket on Linux.
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    fn connect_pinned(cfg: &Config, version: &ClientVersion) -> Result<Self, DiscoveryError> {
        let addr = daemon_address(std::env::var("DOCKER_HOST").ok(), &cfg.docker_socket);
        let docker = if is_http_address(&addr) {
            Docker::connect_with_http(&addr, CLIENT_TIMEOUT_SECS, version)?
        } else {
            Docker::connect_with_socket(&addr, CLIENT_TIMEOUT_SECS, version)?
        };
        Ok(Self { docker })
    }
}

/// `DOCKER_HOST` when set, the configured socket otherwise.  Both the
/// pinned and the default client honour the same variable.
fn daemon_address(docker_host: Option<String>, socket: &str) -> String {
    docker_host
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| socket.to_string())
}

fn is_http_address(addr: &str) -> bool {
    addr.starts_with("tcp://") || addr.starts_with("http://")
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, DiscoveryError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        let mut snapshots = Vec::with_capacity(containers.len());
        for c in containers {
            let Some(id) = c.id else { continue };
            let networks = c
                .network_settings
                .and_then(|s| s.networks)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(name, endpoint)| {
                    endpoint
                        .ip_address
                        .filter(|ip| !ip.is_empty())
                        .map(|ip| (name, ip))
                })
                .collect();
            let ports = c
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| PortMapping {
                    ip: p.ip,
                    private_port: p.private_port,
                    public_port: p.public_port,
                    protocol: p.typ.map(|t| t.to_string()),
                })
                .collect();

            snapshots.push(ContainerSnapshot {
                id,
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                labels: c.labels.unwrap_or_default().into_iter().collect(),
                networks,
                ports,
            });
        }
        Ok(snapshots)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspection, DiscoveryError> {
        let detail = self.docker.inspect_container(id, None).await?;
        let config = detail.config.unwrap_or_default();

        let mut exposed_ports: Vec<String> = config
            .exposed_ports
            .map(|ports| ports.into_keys().collect())
            .unwrap_or_default();
        exposed_ports.sort();

        Ok(ContainerInspection {
            id: detail.id.unwrap_or_else(|| id.to_string()),
            pid: detail.state.and_then(|s| s.pid),
            env: config.env.unwrap_or_default(),
            labels: config
                .labels
                .unwrap_or_default()
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
            exposed_ports,
        })
    }

    async fn exec_in_container(&self, id: &str, cmd: &[&str]) -> Result<String, DiscoveryError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd.to_vec()),
                    ..Default::default()
                },
            )
            .await?;

        let mut output = String::new();
        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(msg) = stream.next().await {
                output.push_str(&msg?.to_string());
            }
        }

        let exit_code = self.docker.inspect_exec(&exec.id).await?.exit_code;
        if exit_code.is_some_and(|code| code != 0) || output.contains("exec failed") {
            return Err(DiscoveryError::Exec {
                container_id: id.to_string(),
                reason: format!("exit code {:?}: {}", exit_code, output.trim()),
            });
        }
        Ok(output)
    }
}

/// Parses `1.41`, `"1.41"` or `v1.41` into a client version.
fn parse_api_version(raw: &str) -> Option<ClientVersion> {
    let cleaned = raw.trim().replace('"', "");
    let cleaned = cleaned.trim_start_matches('v');
    let (major, minor) = cleaned.split_once('.')?;
    Some(ClientVersion {
        major_version: major.parse().ok()?,
        minor_version: minor.parse().ok()?,
    })
}

fn version_tuple(version: &ClientVersion) -> (usize, usize) {
    (version.major_version, version.minor_version)
}

/// Asks each docker binary in turn for its client API version.
async fn query_client_api_version(
    binaries: &[String],
    limit: Duration,
) -> Option<ClientVersion> {
    for binary in binaries {
        let mut cmd = Command::new(binary);
        cmd.args(["version", "--format", "{{json .Client.APIVersion}}"])
            .kill_on_drop(true);
        match timeout(limit, cmd.output()).await {
            Ok(Ok(out)) if out.status.success() => {
                let raw = String::from_utf8_lossy(&out.stdout);
                if let Some(version) = parse_api_version(&raw) {
                    return Some(version);
                }
                debug!("Unparseable API version from {}: {}", binary, raw.trim());
            }
            Ok(Ok(out)) => debug!("{} version exited with {}", binary, out.status),
            Ok(Err(e)) => debug!("Unable to run {}: {}", binary, e),
            Err(_) => debug!("{} version timed out", binary),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_version_output() {
        let v = parse_api_version("\"1.41\"\n").unwrap();
        assert_eq!(version_tuple(&v), (1, 41));
        let v = parse_api_version("v1.24").unwrap();
        assert_eq!(version_tuple(&v), (1, 24));
        assert!(parse_api_version("latest").is_none());
        assert!(parse_api_version("1.x").is_none());
    }

    #[test]
    fn old_versions_compare_below_library_default() {
        let old = parse_api_version("1.24").unwrap();
        let new = parse_api_version("9.99").unwrap();
        assert!(version_tuple(&old) <= version_tuple(API_DEFAULT_VERSION));
        assert!(version_tuple(&new) > version_tuple(API_DEFAULT_VERSION));
    }

    #[test]
    fn docker_host_overrides_configured_socket() {
        let socket = "/var/run/docker.sock";
        assert_eq!(daemon_address(None, socket), socket);
        assert_eq!(daemon_address(Some("  ".into()), socket), socket);
        assert_eq!(
            daemon_address(Some("tcp://10.0.0.1:2375".into()), socket),
            "tcp://10.0.0.1:2375"
        );
        assert_eq!(
            daemon_address(Some("unix:///run/user/1000/docker.sock".into()), socket),
            "unix:///run/user/1000/docker.sock"
        );
    }

    #[test]
    fn tcp_hosts_use_http_transport() {
        assert!(is_http_address("tcp://10.0.0.1:2375"));
        assert!(is_http_address("http://localhost:2375"));
        assert!(!is_http_address("unix:///var/run/docker.sock"));
        assert!(!is_http_address("/var/run/docker.sock"));
    }

    #[tokio::test]
    async fn version_query_skips_missing_binaries() {
        let binaries = vec!["/nonexistent/docker-binary".to_string()];
        assert!(query_client_api_version(&binaries, Duration::from_secs(1))
            .await
            .is_none());
    }
}
