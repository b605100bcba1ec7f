//! Error types shared by the transports and the provider adapter.

use thiserror::Error;

/// Failure reported by a [`ChatTransport`](crate::transport::ChatTransport).
///
/// Transports classify wire-level failures into these kinds so that the
/// adapter's fallback logic never has to look at message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// A credential or endpoint is missing. No network call was made.
    #[error("{0}")]
    Configuration(String),

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the requested model.
    #[error("{0}")]
    ModelNotFound(String),

    /// Any other error reported by the backend.
    #[error("{0}")]
    Backend(String),

    /// The backend answered with a payload that could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn is_model_not_found(&self) -> bool {
        matches!(self, TransportError::ModelNotFound(_))
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(err: anyhow::Error) -> Self {
        TransportError::Unavailable(format!("{err:#}"))
    }
}
