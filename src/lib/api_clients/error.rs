use reqwest::StatusCode;
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HttpRequestError: {1}: {0}")]
    HttpRequestError(Arc<reqwest::Error>, String),
    #[error("InvalidStatus: {0}: {1}")]
    InvalidStatus(StatusCode, String),
    /// Error body returned by the node for a rejected request.
    #[error("RpcError: {0}: {1}")]
    RpcError(StatusCode, String),
    #[error("ResponseParseError: {0}")]
    ResponseParseError(String),
}

impl Error {
    /// Transport failures, throttling and server-side errors are worth another
    /// attempt. A request the node rejected with an error body is not, unless
    /// it was throttled or the node was unavailable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::HttpRequestError(_, _) => true,
            Error::InvalidStatus(status, _) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::RpcError(status, _) => {
                *status == StatusCode::SERVICE_UNAVAILABLE || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::ResponseParseError(_) => false,
        }
    }
}
