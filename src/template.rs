//! Probe configuration templates and their materialization.
//!
//! Templates are YAML documents containing `${auto:host}`, `${auto:ip}`
//! and `${auto:port}` placeholders.  A configuration is only emitted
//! when every placeholder has been substituted.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;
use crate::types::{ContainerSnapshot, Coordinates};

pub const HOST_PLACEHOLDER: &str = "${auto:host}";
pub const IP_PLACEHOLDER: &str = "${auto:ip}";
pub const PORT_PLACEHOLDER: &str = "${auto:port}";

const PLACEHOLDERS: [&str; 3] = [HOST_PLACEHOLDER, IP_PLACEHOLDER, PORT_PLACEHOLDER];

/// A template as loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDocument {
    pub file_name: String,
    pub raw_text: String,
}

/// The loaded templates, sorted by file name.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    documents: Vec<TemplateDocument>,
}

impl TemplateStore {
    pub fn new(mut documents: Vec<TemplateDocument>) -> Self {
        documents.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Self { documents }
    }

    /// Loads every `.yml`/`.yaml` file of `dir`.  A missing directory is
    /// an empty store.
    pub fn load_dir(dir: &Path) -> Result<Self, DiscoveryError> {
        let io_err = |source: std::io::Error| DiscoveryError::TemplateIo {
            path: dir.display().to_string(),
            source,
        };
        if !dir.exists() {
            warn!("template directory {} does not exist", dir.display());
            return Ok(Self::default());
        }

        let mut documents = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yml" || e == "yaml");
            if !path.is_file() || !is_yaml {
                continue;
            }
            let raw_text = fs::read_to_string(&path).map_err(|source| DiscoveryError::TemplateIo {
                path: path.display().to_string(),
                source,
            })?;
            if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
                documents.push(TemplateDocument {
                    file_name: file_name.to_string(),
                    raw_text,
                });
            }
        }
        debug!("loaded {} templates from {}", documents.len(), dir.display());
        Ok(Self::new(documents))
    }

    pub fn get(&self, file_name: &str) -> Option<&TemplateDocument> {
        self.documents.iter().find(|d| d.file_name == file_name)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A parsed probe configuration.  Keys other than `name` and
/// `custom_attributes` are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, serde_yaml::Value>,
}

pub fn parse_template(text: &str) -> Result<ProbeConfig, DiscoveryError> {
    Ok(serde_yaml::from_str(text)?)
}

/// A configuration ready to be run against a discovered container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedConfig {
    pub file_name: String,
    pub container_id: String,
    pub config: ProbeConfig,
}

/// Replaces every placeholder whose value is known.
pub fn substitute(text: &str, coords: &Coordinates) -> String {
    let mut out = text.to_string();
    if let Some(ip) = &coords.ip {
        out = out.replace(HOST_PLACEHOLDER, ip).replace(IP_PLACEHOLDER, ip);
    }
    if let Some(port) = &coords.port {
        out = out.replace(PORT_PLACEHOLDER, port);
    }
    out
}

/// Placeholders still present in `text`.
pub fn unresolved_placeholders(text: &str) -> Vec<&'static str> {
    PLACEHOLDERS
        .iter()
        .copied()
        .filter(|p| text.contains(p))
        .collect()
}

/// Materializes `config_name`.yml for `target`.  Returns `None`, after
/// logging why, when the template is missing, a placeholder stays
/// unresolved or the result does not parse.
pub fn synthesize(
    templates: &TemplateStore,
    config_name: &str,
    coords: &Coordinates,
    target: &ContainerSnapshot,
) -> Option<SynthesizedConfig> {
    let file_name = format!("{config_name}.yml");
    let Some(template) = templates.get(&file_name) else {
        debug!(
            "container discovery {}: no template {} loaded",
            target.id, file_name
        );
        return None;
    };
    debug!("container discovery {} matched {}", target.id, file_name);

    let text = substitute(&template.raw_text, coords);
    let missing = unresolved_placeholders(&text);
    if !missing.is_empty() {
        debug!("couldn't build dynamic cfg for: {} - {}", target.image, target.id);
        debug!(
            "missing variable {:?} unable to create dynamic cfg ip:<{}>-port:<{}>",
            missing,
            coords.ip.as_deref().unwrap_or_default(),
            coords.port.as_deref().unwrap_or_default()
        );
        return None;
    }

    let mut config = match parse_template(&text) {
        Ok(config) => config,
        Err(e) => {
            warn!("unable to parse dynamic cfg {}: {}", file_name, e);
            debug!("{}", text);
            return None;
        }
    };

    let attributes = config.custom_attributes.get_or_insert_with(BTreeMap::new);
    attributes.extend(target.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    attributes.insert("containerID".into(), target.id.clone());
    attributes.insert("image".into(), target.image.clone());
    attributes.insert("IDShort".into(), target.short_id().to_string());

    Some(SynthesizedConfig {
        file_name,
        container_id: target.id.clone(),
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(file_name: &str, raw_text: &str) -> TemplateStore {
        TemplateStore::new(vec![TemplateDocument {
            file_name: file_name.into(),
            raw_text: raw_text.into(),
        }])
    }

    fn target() -> ContainerSnapshot {
        ContainerSnapshot {
            id: "4f3c2b1a09876543210fedcba".into(),
            image: "redis:6.2".into(),
            labels: BTreeMap::from([("team".to_string(), "core".to_string())]),
            ..Default::default()
        }
    }

    fn coords(ip: Option<&str>, port: Option<&str>) -> Coordinates {
        Coordinates {
            ip: ip.map(Into::into),
            port: port.map(Into::into),
        }
    }

    #[test]
    fn substitutes_all_placeholders() {
        let text = "a: ${auto:host}\nb: ${auto:ip}\nc: ${auto:port}\nd: ${auto:host}";
        let out = substitute(text, &coords(Some("10.0.0.1"), Some("80")));
        assert_eq!(out, "a: 10.0.0.1\nb: 10.0.0.1\nc: 80\nd: 10.0.0.1");
        assert!(unresolved_placeholders(&out).is_empty());
    }

    #[test]
    fn unresolved_port_is_reported() {
        let out = substitute("h: ${auto:host}\np: ${auto:port}", &coords(Some("10.0.0.1"), None));
        assert_eq!(unresolved_placeholders(&out), [PORT_PLACEHOLDER]);
    }

    #[test]
    fn synthesizes_and_decorates() {
        let templates = store(
            "redis.yml",
            concat!(
                "name: redis\n",
                "custom_attributes:\n  env: prod\n  team: old\n",
                "apis:\n  - name: info\n    host: ${auto:host}\n",
            ),
        );
        let ip = coords(Some("172.17.0.5"), None);
        let out = synthesize(&templates, "redis", &ip, &target()).unwrap();
        assert_eq!(out.file_name, "redis.yml");
        assert_eq!(out.config.name.as_deref(), Some("redis"));
        let attrs = out.config.custom_attributes.unwrap();
        assert_eq!(attrs["env"], "prod");
        assert_eq!(attrs["team"], "core");
        assert_eq!(attrs["containerID"], "4f3c2b1a09876543210fedcba");
        assert_eq!(attrs["IDShort"], "4f3c2b1a0987");
        assert_eq!(attrs["image"], "redis:6.2");
        let apis = serde_yaml::to_string(&out.config.rest["apis"]).unwrap();
        assert!(apis.contains("host: 172.17.0.5"));
    }

    #[test]
    fn missing_template_emits_nothing() {
        let templates = store("postgres.yml", "name: pg");
        let ip = coords(Some("1.2.3.4"), None);
        assert!(synthesize(&templates, "redis", &ip, &target()).is_none());
    }

    #[test]
    fn unresolved_placeholder_emits_nothing() {
        let templates = store("redis.yml", "name: redis\nport: ${auto:port}\n");
        let ip = coords(Some("1.2.3.4"), None);
        assert!(synthesize(&templates, "redis", &ip, &target()).is_none());
    }

    #[test]
    fn invalid_yaml_emits_nothing() {
        let templates = store("redis.yml", "name: [unclosed\n");
        assert!(synthesize(&templates, "redis", &Coordinates::default(), &target()).is_none());
    }

    #[test]
    fn loads_yaml_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("redis.yml"), "name: redis\n").unwrap();
        fs::write(dir.path().join("nginx.yaml"), "name: nginx\n").unwrap();
        fs::write(dir.path().join("README.md"), "# docs\n").unwrap();

        let templates = TemplateStore::load_dir(dir.path()).unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates.get("redis.yml").unwrap().raw_text, "name: redis\n");
        assert!(templates.get("README.md").is_none());
    }

    #[test]
    fn missing_directory_is_empty_store() {
        let templates = TemplateStore::load_dir(Path::new("/nonexistent/templates")).unwrap();
        assert!(templates.is_empty());
    }
}
