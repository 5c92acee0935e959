use serde::Serialize;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub session_ttl: Duration,
    /// Shared secret guarding the session-mint endpoint (the SSO callback
    /// stand-in). `None` disables the endpoint entirely.
    #[serde(skip_serializing)]
    pub sso_shared_secret: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub slow_request_threshold: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(60 * 60 * 12),
            sso_shared_secret: None,
            cors_allowed_origins: Vec::new(),
            slow_request_threshold: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayConfig {
    pub upstream_base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            request_timeout: Duration::from_secs(120),
            channel_capacity: 32,
        }
    }
}

pub fn validate_startup_config_contract(
    api: &ApiConfig,
    relay: &RelayConfig,
) -> Result<(), String> {
    if api.max_body_bytes == 0 {
        return Err("max body bytes must be > 0".to_string());
    }
    if api.request_timeout.is_zero() || api.session_ttl.is_zero() {
        return Err("timeouts must be > 0".to_string());
    }
    if api
        .sso_shared_secret
        .as_deref()
        .is_some_and(|s| s.trim().is_empty())
    {
        return Err("sso shared secret must be non-empty when set".to_string());
    }
    if relay.upstream_base_url.trim().is_empty() {
        return Err("relay upstream base url must be non-empty".to_string());
    }
    if relay.request_timeout.is_zero() {
        return Err("relay request timeout must be > 0".to_string());
    }
    if relay.channel_capacity == 0 {
        return Err("relay channel capacity must be > 0".to_string());
    }
    Ok(())
}
