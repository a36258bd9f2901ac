//! Error types for the canopy operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error (root or leaf)
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Kubeconfig could not be turned into a client config
    #[error("Kubeconfig error: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),

    /// Kubeconfig YAML could not be parsed
    #[error("Invalid kubeconfig YAML: {0}")]
    KubeconfigParseError(#[from] serde_yaml::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Operator configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Root node disappeared while updating its status
    #[error("cannot get node {0} in root cluster while updating its status: {1}")]
    RootNodeFetch(String, kube::Error),

    /// The leaf has no nodes backing a synthetic root node
    #[error("no nodes in leaf cluster back root node {0}")]
    EmptyLeafNodes(String),

    /// Leaf addresses could not be rewritten for the root
    #[error("address translation failed: {0}")]
    AddressTranslation(String),

    /// Finalizer lifecycle error from the kube runtime
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// Several per-node failures from one reconciliation pass
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl Error {
    /// True for an optimistic-concurrency conflict (HTTP 409) on either API.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::KubeError(kube::Error::Api(ae)) | Error::RootNodeFetch(_, kube::Error::Api(ae))
                if ae.code == 409
        )
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(err.to_string())
    }
}

/// Collects every per-node failure from a reconciliation pass instead of
/// flattening them to a single cause.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    /// Wrap the collected errors in a `Result`: `Ok(())` when none occurred.
    pub fn into_result(errors: Vec<Error>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(AggregateError { errors }))
        }
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s) occurred: [", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateError {}

pub type Result<T> = std::result::Result<T, Error>;
