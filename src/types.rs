//! Data structures shared by the discovery engine.
//!
//! Runtime clients translate their own API models into these types so
//! the engine never depends on a particular container runtime.  Maps
//! are ordered (`BTreeMap`) so that "first network" and "first exposed
//! port" are stable for a given container.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Label carrying the container name under Kubernetes.
pub const K8S_CONTAINER_NAME_LABEL: &str = "io.kubernetes.container.name";

/// Label carrying the container port declarations under Kubernetes.
pub const K8S_CONTAINER_PORTS_LABEL: &str = "annotation.io.kubernetes.container.ports";

/// A published or private port of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Host IP the port is published on.
    pub ip: Option<String>,
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: Option<String>,
}

/// A container as returned by a listing call.  Immutable once enumerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: String,
    /// Names as reported by the runtime; Docker prefixes them with `/`.
    pub names: Vec<String>,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    /// Network name -> IP address on that network.
    pub networks: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
}

impl ContainerSnapshot {
    /// Container names with the leading path separator removed.
    pub fn stripped_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.trim_start_matches('/'))
    }

    /// Kubernetes container name label, if present.
    pub fn k8s_container_name(&self) -> Option<&str> {
        self.labels.get(K8S_CONTAINER_NAME_LABEL).map(String::as_str)
    }

    /// First 12 characters of the id.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// Details only available from inspecting a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInspection {
    pub id: String,
    /// Host pid of the container's init process.
    pub pid: Option<i64>,
    /// `KEY=VALUE` environment assignments.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Exposed ports such as `6379/tcp`, sorted.
    pub exposed_ports: Vec<String>,
}

/// Which address of a target is used to reach it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpMode {
    /// Address on the container network and the container-side port.
    #[default]
    Private,
    /// Host IP and port the container port is published on.
    Public,
}

impl FromStr for IpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(IpMode::Private),
            "public" => Ok(IpMode::Public),
            other => Err(format!("unknown ip mode '{other}'")),
        }
    }
}

/// Network coordinates of a target.  Either field may stay unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coordinates {
    pub ip: Option<String>,
    pub port: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripped_names_remove_leading_slash() {
        let c = ContainerSnapshot {
            names: vec!["/cache-1".into(), "plain".into()],
            ..Default::default()
        };
        assert_eq!(c.stripped_names().collect::<Vec<_>>(), ["cache-1", "plain"]);
    }

    #[test]
    fn short_id_handles_short_ids() {
        let mut c = ContainerSnapshot {
            id: "0123456789abcdef".into(),
            ..Default::default()
        };
        assert_eq!(c.short_id(), "0123456789ab");
        c.id = "abc".into();
        assert_eq!(c.short_id(), "abc");
    }

    #[test]
    fn ip_mode_parses_known_tokens_only() {
        assert_eq!("public".parse::<IpMode>(), Ok(IpMode::Public));
        assert_eq!("private".parse::<IpMode>(), Ok(IpMode::Private));
        assert!("host".parse::<IpMode>().is_err());
    }
}
