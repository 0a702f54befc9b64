use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("SerializationError: {0}")]
    YamlSerializationError(#[source] serde_yaml::Error),

    #[error("Http Server Error: {0}")]
    HttpServerError(#[source] std::io::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Configuration Error: {0}")]
    ConfigError(#[source] config::ConfigError),

    #[error("Invalid resync interval {0:?}: {1}")]
    InvalidResyncInterval(String, #[source] humantime::DurationError),

    #[error("ClusterCSIDriver CRD is not installed")]
    CrdNotInstalled,

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Invalid manifest {0}: {1}")]
    InvalidManifest(String, String),

    #[error("ClusterCSIDriver {0} not found in cache")]
    OperatorNotFound(String),

    #[error("Another pod holds the lease")]
    LeaseHeldByAnotherPod,

    #[error("Leader election requires {0} to be set")]
    LeaderElectionMisconfigured(&'static str),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("{0} failed: {1}")]
    SyncFailed(String, String),

    #[error("Degraded controllers: {}", .0.join(", "))]
    Degraded(Vec<String>),

    #[error("Tracing Error: {0}")]
    TracingError(String),
}

impl Error {
    pub fn metric_label(&self) -> String {
        let debug = format!("{self:?}");
        let variant = debug
            .split(|c: char| c == '(' || c == ' ' || c == '{')
            .next()
            .unwrap_or_default();
        variant.to_lowercase()
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(response)) => response.code == 404,
            Error::OperatorNotFound(_) => true,
            _ => false,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::KubeError(error)
    }
}
