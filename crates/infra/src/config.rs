use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub store_endpoint: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub auth_dev_bypass_enabled: bool,
    pub fanout_page_size: usize,
    pub fanout_concurrency: usize,
    pub digest_sweep_interval_ms: u64,
    pub worker_queue_prefix: String,
    pub worker_poll_interval_ms: u64,
    pub worker_promote_batch: usize,
    pub worker_backoff_base_ms: u64,
    pub worker_backoff_max_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("store_endpoint", "postgres://127.0.0.1:5432")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("auth_dev_bypass_enabled", false)?
            .set_default("fanout_page_size", 200)?
            .set_default("fanout_concurrency", 16)?
            .set_default("digest_sweep_interval_ms", 3_600_000)?
            .set_default("worker_queue_prefix", "ripple:jobs")?
            .set_default("worker_poll_interval_ms", 1000)?
            .set_default("worker_promote_batch", 50)?
            .set_default("worker_backoff_base_ms", 1000)?
            .set_default("worker_backoff_max_ms", 60000)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
