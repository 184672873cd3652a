pub mod activities;
pub mod digest;
pub mod error;
pub mod fanout;
pub mod feed;
pub mod jobs;
pub mod notifications;
pub mod ports;
pub mod preferences;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
