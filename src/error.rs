//! Error types for the validation operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Listing the served API resources failed
    #[error("Resource discovery failed: {0}")]
    DiscoveryError(#[source] kube::Error),

    /// Listing cluster namespaces failed
    #[error("Failed to list namespaces: {0}")]
    NamespaceListError(#[source] kube::Error),

    /// Listing objects of one resource type failed, possibly mid-pagination
    #[error(
        "Failed to list {resource} in {}: {source}",
        .namespace.as_deref().unwrap_or("cluster scope")
    )]
    ListError {
        resource: String,
        namespace: Option<String>,
        #[source]
        source: kube::Error,
    },

    /// The validation engine could not evaluate a single object
    #[error("Validation engine failed for {identity}: {message}")]
    EngineError { identity: String, message: String },

    /// Every attempt of a reconciliation cycle failed
    #[error("Reconciliation cycle failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid namespace ignore pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Short, stable category used as the `kind` label on error counters.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::DiscoveryError(_) => "discovery",
            Error::NamespaceListError(_) => "namespaces",
            Error::ListError { .. } => "list",
            Error::EngineError { .. } => "engine",
            Error::RetriesExhausted { .. } => "exhausted",
            Error::ConfigError(_) | Error::PatternError(_) => "config",
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) | Error::YamlError(_) => "serialization",
            Error::IoError(_) => "io",
        }
    }

    /// Whether a failed cycle with this error should be retried.
    pub fn is_cycle_retriable(&self) -> bool {
        matches!(
            self,
            Error::DiscoveryError(_)
                | Error::NamespaceListError(_)
                | Error::ListError { .. }
                | Error::KubeError(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
