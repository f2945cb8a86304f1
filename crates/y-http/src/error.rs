use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the provider.
///
/// Transport failures keep the collaborator's error behind an `Arc` so the
/// same error can be returned to a caller and broadcast as an event.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Failed to open connection: {0:#}")]
    ConnectFailure(Arc<anyhow::Error>),

    #[error("Sync request failed: {0:#}")]
    SyncFailure(Arc<anyhow::Error>),

    #[error("Failed to close connection: {0:#}")]
    CloseFailure(Arc<anyhow::Error>),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Document engine error: {0}")]
    Engine(String),

    #[error("Provider has been destroyed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ProviderError>;
