//! Error type of the discovery library.
//!
//! None of these escape a discovery pass: they are logged where they
//! occur and the affected container or directive is skipped.

/// Errors raised by the collaborators of the discovery engine.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Docker API call failed.
    #[error("docker api error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Command executed inside a container failed.
    #[error("exec in container '{container_id}' failed: {reason}")]
    Exec {
        container_id: String,
        reason: String,
    },

    /// Template directory or file could not be read.
    #[error("template io error: {path}: {source}")]
    TemplateIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Substituted template is not valid YAML.
    #[error("template parse error: {0}")]
    TemplateParse(#[from] serde_yaml::Error),

    /// Docker API version string could not be understood.
    #[error("invalid docker api version '{0}'")]
    ApiVersion(String),
}
