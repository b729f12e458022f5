#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("LoadConfigFailed: {0}")]
    LoadConfigFailed(#[from] envy::Error),
    #[error("ApiClientError: {0}")]
    ApiClientError(#[from] crate::api_clients::Error),
    #[error("DbDieselError: {0}")]
    DbDieselError(#[from] diesel::result::Error),
    #[error("DbError: {0}")]
    DbError(String),
    #[error("ConnectionPoolError: {0}")]
    ConnectionPoolError(#[from] r2d2::Error),
    #[error("MissingUpstreamData: {0}")]
    MissingUpstreamData(String),
    #[error("InvalidAsset: {0}")]
    InvalidAsset(String),
    #[error("InvalidRow: {0}")]
    InvalidRow(String),
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),
}
