use std::net::SocketAddr;

use crate::engine_config::EngineConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    /// Postgres archive store; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub api_keys: Vec<String>,
    pub db_max_connections: u32,
    pub store_max_retries: u32,
    pub store_retry_backoff_base_ms: u64,
    pub engine: EngineConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[redacted]"),
            )
            .field("api_keys", &format!("[{} redacted]", self.api_keys.len()))
            .field("db_max_connections", &self.db_max_connections)
            .field("store_max_retries", &self.store_max_retries)
            .field(
                "store_retry_backoff_base_ms",
                &self.store_retry_backoff_base_ms,
            )
            .field("engine", &self.engine)
            .finish()
    }
}
