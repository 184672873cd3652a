use ripple_domain::ports::BoxFuture;
use ripple_domain::ports::db::{StoreAdapter, StoreError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
}

impl StoreConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.store_endpoint.clone(),
        }
    }
}

/// Liveness probe over the relational store endpoint. The engine reaches
/// the store through injected repository ports; this adapter only owns the
/// connection lifecycle signal used by health checks and shutdown.
#[derive(Debug, Clone)]
pub struct RelationalStoreAdapter {
    config: StoreConfig,
}

impl RelationalStoreAdapter {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl StoreAdapter for RelationalStoreAdapter {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        let endpoint = self.config.endpoint.clone();
        Box::pin(async move {
            let address = parse_socket_address(&endpoint)?;
            let connect = timeout(Duration::from_secs(2), TcpStream::connect(address))
                .await
                .map_err(|_| StoreError::Unavailable("store connect timed out".to_string()))?;
            connect
                .map_err(|err| StoreError::Unavailable(format!("store connect failed: {err}")))?;

            tracing::debug!(endpoint, "store health check succeeded");
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        let endpoint = self.config.endpoint.clone();
        Box::pin(async move {
            tracing::info!(endpoint, "store handle closed");
            Ok(())
        })
    }
}

fn parse_socket_address(endpoint: &str) -> Result<String, StoreError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("postgres://{endpoint}")
    };
    let parsed = Url::parse(&normalized)
        .map_err(|err| StoreError::Unavailable(format!("invalid store endpoint '{endpoint}': {err}")))?;

    let host = parsed.host_str().ok_or_else(|| {
        StoreError::Unavailable(format!("missing store host in endpoint '{endpoint}'"))
    })?;
    let port = parsed.port_or_known_default().unwrap_or(match parsed.scheme() {
        "postgres" | "postgresql" => 5432,
        "mysql" => 3306,
        _ => 5432,
    });
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_host_port() {
        assert_eq!(
            parse_socket_address("127.0.0.1:5433").unwrap(),
            "127.0.0.1:5433"
        );
    }

    #[test]
    fn defaults_postgres_port() {
        assert_eq!(
            parse_socket_address("postgres://db.internal").unwrap(),
            "db.internal:5432"
        );
    }

    #[test]
    fn rejects_malformed_endpoint() {
        assert!(parse_socket_address("not a valid endpoint").is_err());
    }
}
