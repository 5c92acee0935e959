#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;

pub mod access;
pub mod config;
pub mod db;
pub mod docstore;
pub mod http;
pub mod relay;
pub mod telemetry;

pub const CRATE_NAME: &str = "caseroom-server";

/// Infrastructure failure wrapper shared by the data store and the
/// document store. The message never reaches a client verbatim.
#[derive(Debug)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for StoreError {}

pub use config::{ApiConfig, RelayConfig};
pub use db::Database;
pub use docstore::{DocumentStoreBackend, FakeDocumentStore, LocalFsBackend, S3LikeBackend};
pub use relay::{CompletionBackend, CompletionEvent, FakeCompletionBackend, HttpCompletionBackend};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub documents: Arc<dyn DocumentStoreBackend>,
    pub completions: Arc<dyn CompletionBackend>,
    pub api: ApiConfig,
    pub ready: Arc<AtomicBool>,
    pub(crate) metrics: Arc<telemetry::RequestMetrics>,
    pub(crate) request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        documents: Arc<dyn DocumentStoreBackend>,
        completions: Arc<dyn CompletionBackend>,
        api: ApiConfig,
    ) -> Self {
        Self {
            db,
            documents,
            completions,
            api,
            ready: Arc::new(AtomicBool::new(true)),
            metrics: Arc::new(telemetry::RequestMetrics::default()),
            request_id_seed: Arc::new(AtomicU64::new(1)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(http::handlers::healthz_handler))
        .route("/readyz", get(http::handlers::readyz_handler))
        .route("/metrics", get(telemetry::metrics_handler))
        .route("/v1/version", get(http::handlers::version_handler))
        .route("/v1/sessions", post(http::handlers::create_session_handler))
        .route(
            "/v1/cases",
            post(http::handlers::create_case_handler).get(http::handlers::list_cases_handler),
        )
        .route(
            "/v1/cases/:case_id",
            get(http::handlers::get_case_handler).delete(http::handlers::delete_case_handler),
        )
        .route(
            "/v1/cases/:case_id/access",
            get(http::handlers::list_access_handler).post(http::handlers::grant_access_handler),
        )
        .route(
            "/v1/cases/:case_id/access/:user_id",
            delete(http::handlers::revoke_access_handler),
        )
        .route(
            "/v1/cases/:case_id/students",
            post(http::roster::add_students_handler),
        )
        .route(
            "/v1/cases/:case_id/roster",
            post(http::roster::upload_roster_handler),
        )
        .route(
            "/v1/cases/:case_id/assistants",
            get(http::handlers::list_assistants_handler)
                .post(http::handlers::create_assistant_handler),
        )
        .route("/v1/users", get(http::handlers::list_users_handler))
        .route("/v1/users/:user_id", delete(http::handlers::delete_user_handler))
        .route(
            "/v1/admin/case-access",
            post(http::handlers::assign_admin_handler),
        )
        .route(
            "/v1/admin/case-access/:case_id",
            get(http::handlers::list_admin_assignments_handler),
        )
        .route(
            "/v1/admin/case-access/:case_id/:user_id",
            delete(http::handlers::unassign_admin_handler),
        )
        .route("/v1/chat", post(http::chat::chat_handler))
        .layer(DefaultBodyLimit::max(state.api.max_body_bytes))
        .with_state(state)
}
