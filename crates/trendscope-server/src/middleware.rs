use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use trendscope_core::{AppConfig, Environment};
use uuid::Uuid;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Bearer-token settings used by [`require_bearer_auth`].
#[derive(Debug, Clone)]
pub struct AuthState {
    api_keys: Arc<Vec<String>>,
    pub enabled: bool,
}

impl AuthState {
    /// Builds auth from `TRENDSCOPE_API_KEYS`.
    ///
    /// Without keys, auth is disabled in development and startup fails
    /// everywhere else.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if config.api_keys.is_empty() {
            if config.env == Environment::Development {
                tracing::warn!(
                    "TRENDSCOPE_API_KEYS not set; bearer auth disabled in development environment"
                );
                return Ok(Self::disabled());
            }
            anyhow::bail!(
                "TRENDSCOPE_API_KEYS is required outside development; provide comma-separated bearer tokens"
            );
        }
        Ok(Self::with_keys(config.api_keys.clone()))
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            api_keys: Arc::new(Vec::new()),
            enabled: false,
        }
    }

    #[must_use]
    pub fn with_keys(keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(keys),
            enabled: true,
        }
    }

    /// Every configured key is compared so timing does not reveal which one
    /// matched.
    fn allows(&self, token: &str) -> bool {
        self.api_keys.iter().fold(false, |found, key| {
            found | bool::from(key.as_bytes().ct_eq(token.as_bytes()))
        })
    }
}

#[derive(Debug, Serialize)]
struct MiddlewareErrorBody {
    error: MiddlewareError,
}

#[derive(Debug, Serialize)]
struct MiddlewareError {
    code: &'static str,
    message: &'static str,
}

/// Uses the incoming `x-request-id` header or a fresh `UUIDv4`, stores it
/// as a [`RequestId`] extension and echoes it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    match extract_bearer_token(req.headers().get(AUTHORIZATION)) {
        Some(token) if auth.allows(token) => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(MiddlewareErrorBody {
                error: MiddlewareError {
                    code: "unauthorized",
                    message: "missing or invalid bearer token",
                },
            }),
        )
            .into_response(),
    }
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use trendscope_core::EngineConfig;

    use super::*;

    fn config(env: Environment, api_keys: Vec<String>) -> AppConfig {
        AppConfig {
            database_url: None,
            env,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
            log_level: "info".to_string(),
            api_keys,
            db_max_connections: 5,
            store_max_retries: 3,
            store_retry_backoff_base_ms: 10,
            engine: EngineConfig::default(),
        }
    }

    #[test]
    fn extract_bearer_token_accepts_valid_header() {
        let header = HeaderValue::from_static("Bearer test-token");
        assert_eq!(extract_bearer_token(Some(&header)), Some("test-token"));
    }

    #[test]
    fn extract_bearer_token_rejects_non_bearer_header() {
        let header = HeaderValue::from_static("Basic abc123");
        assert_eq!(extract_bearer_token(Some(&header)), None);
    }

    #[test]
    fn auth_is_disabled_without_keys_in_development() {
        let state = AuthState::from_config(&config(Environment::Development, Vec::new()))
            .expect("dev should allow missing keys");
        assert!(!state.enabled);
    }

    #[test]
    fn missing_keys_fail_outside_development() {
        assert!(AuthState::from_config(&config(Environment::Production, Vec::new())).is_err());
    }

    #[test]
    fn allows_only_configured_keys() {
        let state = AuthState::with_keys(vec!["alpha".into(), "beta".into()]);
        assert!(state.allows("beta"));
        assert!(!state.allows("gamma"));
        assert!(!state.allows("alph"));
    }
}
