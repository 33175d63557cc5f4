//! Network coordinate resolution.
//!
//! Each field is resolved by an ordered chain of sources; the first
//! source yielding a value wins:
//!
//! | field | sources                                                          |
//! |-------|------------------------------------------------------------------|
//! | ip    | ip mode -> host proc `fib_trie` -> `hostname -i` in the container |
//! | port  | directive override -> ip mode -> Kubernetes ports label -> exposed port |

use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::DiscoverySettings;
use crate::directive::Directive;
use crate::runtime::ContainerRuntime;
use crate::types::{
    ContainerInspection, ContainerSnapshot, Coordinates, IpMode, K8S_CONTAINER_PORTS_LABEL,
};

const OCTET: &str = "(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)";

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^({OCTET}\.){{3}}{OCTET}$")).expect("static ipv4 regex")
});

/// Prints the `/32 host` addresses of a `fib_trie` dump, loopback excluded.
const FIB_TRIE_PIPELINE: &str =
    "awk '/32 host/ { print f } {f=$2}' | grep -v 127.0.0.1 | sort -u";

/// First IPv4 address among the whitespace separated tokens of `output`.
pub fn first_ipv4(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| IPV4.is_match(token))
        .map(str::to_string)
}

/// Global override, then the directive's mode, then the default.
pub fn effective_ip_mode(settings: &DiscoverySettings, directive: &Directive) -> IpMode {
    settings
        .override_ip_mode
        .or(directive.ip_mode)
        .unwrap_or(settings.default_ip_mode)
}

/// Coordinates available from the snapshot alone.
pub fn snapshot_coordinates(
    snapshot: &ContainerSnapshot,
    directive: &Directive,
    mode: IpMode,
) -> Coordinates {
    let first_port = snapshot.ports.first();
    let (ip, port) = match mode {
        IpMode::Private => (
            snapshot.networks.values().find(|ip| !ip.is_empty()).cloned(),
            first_port.map(|p| p.private_port.to_string()),
        ),
        IpMode::Public => (
            first_port.and_then(|p| p.ip.clone()).filter(|ip| !ip.is_empty()),
            first_port.and_then(|p| p.public_port).map(|p| p.to_string()),
        ),
    };
    Coordinates {
        ip,
        port: directive.port.clone().or(port),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct K8sPort {
    container_port: Option<serde_json::Value>,
}

/// First `containerPort` declared in the Kubernetes ports annotation.
pub fn k8s_port(snapshot: &ContainerSnapshot) -> Option<String> {
    let raw = snapshot.labels.get(K8S_CONTAINER_PORTS_LABEL)?;
    let ports: Vec<K8sPort> = match serde_json::from_str(raw) {
        Ok(ports) => ports,
        Err(e) => {
            debug!("unable to parse {} on {}: {}", K8S_CONTAINER_PORTS_LABEL, snapshot.id, e);
            return None;
        }
    };
    ports
        .into_iter()
        .find_map(|p| p.container_port)
        .map(|port| match port {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
}

/// First exposed port without its protocol suffix.
pub fn exposed_port(inspection: &ContainerInspection) -> Option<String> {
    inspection
        .exposed_ports
        .first()
        .map(|p| p.split('/').next().unwrap_or(p).to_string())
        .filter(|p| !p.is_empty())
}

/// Reads the first non-loopback IPv4 address from the target's network
/// namespace through the host proc mount.
pub async fn proc_fib_ipv4(settings: &DiscoverySettings, pid: i64) -> Option<String> {
    info!("attempting low level ip fetch for pid {}", pid);
    let script = format!(
        "cat {}/{}/net/fib_trie | {}",
        settings.proc_root.trim_end_matches('/'),
        pid,
        FIB_TRIE_PIPELINE
    );
    let mut cmd = Command::new("/bin/sh");
    cmd.args(["-c", &script]).kill_on_drop(true);

    match timeout(settings.command_timeout, cmd.output()).await {
        Err(_) => {
            debug!("low level ip fetch timed out after {:?}", settings.command_timeout);
            None
        }
        Ok(Err(e)) => {
            debug!("low level ip fetch could not run: {}", e);
            None
        }
        Ok(Ok(out)) if !out.status.success() => {
            debug!(
                "low level ip fetch failed ({}): {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
            None
        }
        Ok(Ok(out)) => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            let ip = first_ipv4(&stdout);
            match &ip {
                Some(ip) => info!("fetched {}", ip),
                None => debug!("low level fetch failed {}", stdout.trim()),
            }
            ip
        }
    }
}

/// Asks the container itself for its address.
pub async fn hostname_ipv4(runtime: &dyn ContainerRuntime, container_id: &str) -> Option<String> {
    match runtime
        .exec_in_container(container_id, &["hostname", "-i"])
        .await
    {
        Ok(output) => {
            let ip = first_ipv4(&output);
            if ip.is_none() {
                debug!("hostname fallback on {} returned {:?}", container_id, output.trim());
            }
            ip
        }
        Err(e) => {
            debug!("secondary fetch container ip failed: {}", e);
            None
        }
    }
}

/// Resolves ip and port for a matched target.
pub async fn resolve(
    runtime: &dyn ContainerRuntime,
    settings: &DiscoverySettings,
    snapshot: &ContainerSnapshot,
    inspection: &ContainerInspection,
    directive: &Directive,
) -> Coordinates {
    let mode = effective_ip_mode(settings, directive);
    let mut coords = snapshot_coordinates(snapshot, directive, mode);

    if coords.ip.is_none() {
        if let Some(pid) = inspection.pid.filter(|pid| *pid > 0) {
            coords.ip = proc_fib_ipv4(settings, pid).await;
        }
    }
    if coords.ip.is_none() {
        coords.ip = hostname_ipv4(runtime, &snapshot.id).await;
    }
    if coords.port.is_none() {
        coords.port = k8s_port(snapshot).or_else(|| exposed_port(inspection));
    }
    coords
}
