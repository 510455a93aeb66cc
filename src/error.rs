use thiserror::Error;

use crate::types::ResourceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration: secret, interval, rate override.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A whole kind could not be listed; aborts that collector for the cycle.
    #[error("failed to list {kind}: {source}")]
    List {
        kind: ResourceKind,
        #[source]
        source: Box<Error>,
    },

    /// Transient I/O failure not raised by the kube client itself.
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("usage source error: {0}")]
    UsageSource(String),

    #[error("sink returned {status} for {endpoint}")]
    SinkStatus { endpoint: String, status: u16 },

    #[error("sink transport error: {0}")]
    SinkTransport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cycle cancelled")]
    Cancelled,
}

impl Error {
    pub fn list(kind: ResourceKind, source: Error) -> Self {
        Error::List {
            kind,
            source: Box::new(source),
        }
    }

    /// Configuration errors are retried next tick but surfaced through status.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
