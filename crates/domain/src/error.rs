use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown category: {0}")]
    InvalidCategory(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
