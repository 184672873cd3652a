use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Handle to the backing store. Opened once at service start, injected into
/// whatever needs it, closed at shutdown.
pub trait StoreAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>>;
    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}
