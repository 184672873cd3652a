use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod activities;
pub mod channels;
pub mod db;
pub mod feed_cache;
pub mod follows;
pub mod jobs;
pub mod notifications;
pub mod preferences;
pub mod subjects;
