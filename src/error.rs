use rmcp::ErrorData as RpcError;

use thiserror::Error;
use tokio::io;

pub type ServiceResult<T> = core::result::Result<T, ServiceError>;

/// Failures reported by the generation backend, or by the checks applied to
/// what it returned.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("generation API returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("response carried no {0}")]
    Empty(&'static str),
    #[error("background task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("PCM payload has an odd byte length ({0})")]
    OddLength(usize),
    #[error("channel count must be at least 1")]
    NoChannels,
    #[error("audio output failed: {0}")]
    Output(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    FromString(String),
    #[error("{0}")]
    Gateway(#[from] GatewayError),
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Audio(#[from] AudioError),
    #[error("{0}")]
    RpcError(#[from] RpcError),
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("{0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("no idea at index {0}")]
    IdeaNotFound(usize),
    #[error("unknown chat session {0}")]
    ChatNotFound(String),
}

impl From<ServiceError> for RpcError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::RpcError(inner) => inner,
            ServiceError::IdeaNotFound(_) | ServiceError::ChatNotFound(_) => {
                RpcError::invalid_params(err.to_string(), None)
            }
            other => RpcError::internal_error(other.to_string(), None),
        }
    }
}
