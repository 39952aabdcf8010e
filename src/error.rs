use thiserror::Error;

/// Failures of the tile pipeline. Cancellation is not represented here: a
/// canceled request is a successful, empty result.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("Invalid tile address: {0}")]
    InvalidAddress(String),
    #[error("Dataset schema unavailable: {0}")]
    SchemaUnavailable(String),
    #[error("Dataset extent unavailable")]
    ExtentUnavailable(#[source] sqlx::Error),
    #[error("Failed to encode tile bound as WKB: {0}")]
    GeometryEncodingFailed(String),
    #[error("Failed to query features")]
    QueryFailed(#[source] sqlx::Error),
    #[error("Failed to encode vector tile: {0}")]
    EncodingFailed(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TileError {
    /// Errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TileError::InvalidAddress(_))
    }
}
