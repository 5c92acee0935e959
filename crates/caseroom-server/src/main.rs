#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use caseroom_model::Email;
use caseroom_server::config::validate_startup_config_contract;
use caseroom_server::docstore::RetryPolicy;
use caseroom_server::{
    build_router, ApiConfig, AppState, CompletionBackend, Database, DocumentStoreBackend,
    HttpCompletionBackend, LocalFsBackend, RelayConfig, S3LikeBackend,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(name, default_ms))
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("CASEROOM_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Operational backstop: the identity provider assigns no flags, so the
/// first super-admin has to come from configuration.
async fn bootstrap_super_admin(db: &Database) -> Result<(), String> {
    let Ok(raw) = env::var("CASEROOM_BOOTSTRAP_SUPER_ADMIN") else {
        return Ok(());
    };
    let email = Email::parse(&raw)
        .map_err(|e| format!("invalid CASEROOM_BOOTSTRAP_SUPER_ADMIN: {e}"))?;
    let user = db
        .upsert_user_by_email(&email, None)
        .await
        .map_err(|e| format!("super admin bootstrap failed: {e}"))?;
    db.set_user_flags(user.id, true, true, true)
        .await
        .map_err(|e| format!("super admin bootstrap failed: {e}"))?;
    info!("bootstrapped super admin {email}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), String> {
    init_tracing();

    let bind_addr = env::var("CASEROOM_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let db_path = PathBuf::from(
        env::var("CASEROOM_DB_PATH").unwrap_or_else(|_| "artifacts/caseroom.sqlite".to_string()),
    );
    let docs_root = PathBuf::from(
        env::var("CASEROOM_DOCS_ROOT").unwrap_or_else(|_| "artifacts/documents".to_string()),
    );

    let api_cfg = ApiConfig {
        max_body_bytes: env_usize("CASEROOM_MAX_BODY_BYTES", 1024 * 1024),
        request_timeout: env_duration_ms("CASEROOM_REQUEST_TIMEOUT_MS", 30_000),
        session_ttl: Duration::from_secs(env_u64("CASEROOM_SESSION_TTL_SECS", 60 * 60 * 12)),
        sso_shared_secret: env::var("CASEROOM_SSO_SHARED_SECRET").ok(),
        cors_allowed_origins: env_list("CASEROOM_CORS_ALLOWED_ORIGINS"),
        slow_request_threshold: env_duration_ms("CASEROOM_SLOW_REQUEST_THRESHOLD_MS", 500),
    };
    let relay_cfg = RelayConfig {
        upstream_base_url: env::var("CASEROOM_RELAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
        api_key: env::var("CASEROOM_RELAY_API_KEY").ok(),
        model: env::var("CASEROOM_RELAY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        request_timeout: env_duration_ms("CASEROOM_RELAY_TIMEOUT_MS", 120_000),
        channel_capacity: env_usize("CASEROOM_RELAY_CHANNEL_CAPACITY", 32),
    };
    validate_startup_config_contract(&api_cfg, &relay_cfg)?;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("create data dir failed: {e}"))?;
    }
    let db = Arc::new(Database::new(db_path));
    bootstrap_super_admin(&db).await?;

    let retry = RetryPolicy {
        max_attempts: env_usize("CASEROOM_DOCS_RETRY_ATTEMPTS", 3),
        base_backoff_ms: env_u64("CASEROOM_DOCS_RETRY_BASE_MS", 100),
    };
    let documents: Arc<dyn DocumentStoreBackend> = if env_bool("CASEROOM_DOCS_S3_ENABLED", false) {
        let base_url = env::var("CASEROOM_DOCS_S3_BASE_URL")
            .map_err(|_| "CASEROOM_DOCS_S3_BASE_URL is required when S3 enabled".to_string())?;
        Arc::new(S3LikeBackend::new(
            base_url,
            env::var("CASEROOM_DOCS_S3_BEARER").ok(),
            retry,
            env_bool("CASEROOM_DOCS_ALLOW_PRIVATE_HOSTS", false),
        ))
    } else {
        Arc::new(LocalFsBackend::new(docs_root))
    };
    let completions: Arc<dyn CompletionBackend> = Arc::new(HttpCompletionBackend::new(&relay_cfg));

    let cors_origins = api_cfg.cors_allowed_origins.clone();
    let state = AppState::new(db.clone(), documents, completions, api_cfg);
    let mut app = build_router(state);
    if !cors_origins.is_empty() {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ])
            .allow_origin(origins)
            .max_age(Duration::from_secs(60 * 60));
        app = app.layer(cors);
    }

    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind addr {bind_addr}: {e}"))?;
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4().map_err(|e| format!("socket v4 failed: {e}"))?
    } else {
        tokio::net::TcpSocket::new_v6().map_err(|e| format!("socket v6 failed: {e}"))?
    };
    socket
        .set_reuseaddr(true)
        .map_err(|e| format!("set_reuseaddr failed: {e}"))?;
    socket
        .set_keepalive(env_bool("CASEROOM_TCP_KEEPALIVE_ENABLED", true))
        .map_err(|e| format!("set_keepalive failed: {e}"))?;
    socket.bind(addr).map_err(|e| format!("bind failed: {e}"))?;
    let listener: TcpListener = socket
        .listen(1024)
        .map_err(|e| format!("listen failed: {e}"))?;
    info!("caseroom-server listening on {bind_addr}");

    let db_for_shutdown = db.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received, draining");
        })
        .await
        .map_err(|e| format!("server failed: {e}"))?;

    if let Err(e) = db_for_shutdown.close().await {
        error!("store close failed: {e}");
    }
    Ok(())
}
