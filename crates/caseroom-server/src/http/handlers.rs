// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info};

use caseroom_api::dto::{
    AdminAssignRequest, CreateAssistantRequest, CreateCaseRequest, GrantAccessRequest,
    SessionRequest, SessionResponse,
};
use caseroom_api::{map_error, ApiError};
use caseroom_core::sha256_hex;
use caseroom_model::{Assistant, Case, CaseId, Email, EffectiveRole};

use crate::access::{
    require_admin, require_case_management, require_case_role, require_super_admin,
    resolve_identity, GateError,
};
use crate::db::unix_seconds;
use crate::AppState;

/// JSON bodies are decoded at the boundary so every malformed payload maps
/// to the same 400, not to framework-specific rejection codes.
pub(crate) fn parse_json_body<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|_| ApiError::validation_failed("malformed json body"))
}

pub(crate) fn api_error_response(err: ApiError) -> Response {
    let status = StatusCode::from_u16(map_error(&err).status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"error": err}))).into_response()
}

pub(crate) fn gate_error_response(err: GateError) -> Response {
    if let GateError::Store(store) = &err {
        error!("access gate store failure: {store}");
    }
    api_error_response(err.to_api())
}

pub(crate) fn make_request_id(state: &AppState) -> String {
    let id = state.request_id_seed.fetch_add(1, Ordering::Relaxed);
    format!("req-{id:016x}")
}

pub(crate) fn propagated_request_id(headers: &HeaderMap, state: &AppState) -> String {
    if let Some(raw) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    make_request_id(state)
}

pub(crate) fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(v) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", v);
    }
    response
}

pub(crate) async fn finish(
    state: &AppState,
    route: &'static str,
    started: Instant,
    request_id: &str,
    response: Response,
) -> Response {
    let status = response.status();
    state
        .metrics
        .observe_request(route, status, started.elapsed())
        .await;
    with_request_id(response, request_id)
}

/// Assistants are serialized for clients without the password digest; only
/// the gated/ungated bit is visible.
pub(crate) fn assistant_view(assistant: &Assistant) -> serde_json::Value {
    json!({
        "id": assistant.id,
        "case_id": assistant.case_id,
        "name": assistant.name,
        "password_gated": assistant.password_gated(),
        "created_at": assistant.created_at,
    })
}

pub(crate) fn parse_case_id(raw: &str) -> Result<CaseId, ApiError> {
    CaseId::parse(raw).map_err(|_| ApiError::invalid_param("case_id", raw))
}

pub(crate) async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let resp = (StatusCode::OK, "ok").into_response();
    finish(&state, "/healthz", started, &request_id, resp).await
}

pub(crate) async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let resp = match state.db.ping().await {
        Ok(()) if state.ready.load(Ordering::Relaxed) => {
            (StatusCode::OK, "ready").into_response()
        }
        Ok(()) => (StatusCode::SERVICE_UNAVAILABLE, "not-ready").into_response(),
        Err(e) => {
            error!("readiness store check failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "not-ready").into_response()
        }
    };
    finish(&state, "/readyz", started, &request_id, resp).await
}

pub(crate) async fn version_handler(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let request_id = make_request_id(&state);
    let payload = json!({
        "crate": crate::CRATE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "config_schema_version": crate::config::CONFIG_SCHEMA_VERSION,
    });
    let resp = Json(payload).into_response();
    finish(&state, "/v1/version", started, &request_id, resp).await
}

/// SSO-callback stand-in: guarded by a shared secret, upserts the user by
/// email ("created on first sign-in") and mints a bearer token.
pub(crate) async fn create_session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/sessions";

    let payload: SessionRequest = match parse_json_body(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    let Some(secret) = state.api.sso_shared_secret.clone() else {
        let resp = api_error_response(ApiError::not_found("endpoint"));
        return finish(&state, route, started, &request_id, resp).await;
    };
    let presented = headers
        .get("x-caseroom-sso-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != secret {
        let resp = api_error_response(ApiError::forbidden("sso shared secret"));
        return finish(&state, route, started, &request_id, resp).await;
    }

    let email = match Email::parse(&payload.email) {
        Ok(v) => v,
        Err(_) => {
            let resp = api_error_response(ApiError::invalid_param("email", &payload.email));
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    let user = match state
        .db
        .upsert_user_by_email(&email, payload.username.as_deref())
        .await
    {
        Ok(v) => v,
        Err(e) => {
            error!("session user upsert failed: {e}");
            let resp = api_error_response(ApiError::upstream_failure());
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    let seed = state.request_id_seed.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let token = sha256_hex(format!("{}:{seed}:{nanos}", email.as_str()).as_bytes());
    let ttl = state.api.session_ttl.as_secs() as i64;
    if let Err(e) = state.db.create_session(&token, user.id, ttl).await {
        error!("session insert failed: {e}");
        let resp = api_error_response(ApiError::upstream_failure());
        return finish(&state, route, started, &request_id, resp).await;
    }

    info!(request_id = %request_id, user = %user.email, "session created");
    let resp = Json(SessionResponse { token, user }).into_response();
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn create_case_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let payload: CreateCaseRequest = match parse_json_body(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if !(user.can_create_cases || user.is_admin || user.is_super_admin) {
        let resp = api_error_response(ApiError::forbidden("case creation"));
        return finish(&state, route, started, &request_id, resp).await;
    }

    let case_id = match parse_case_id(&payload.id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if payload.name.trim().is_empty() {
        let resp = api_error_response(ApiError::validation_failed("case name must be non-empty"));
        return finish(&state, route, started, &request_id, resp).await;
    }

    let case = Case {
        id: case_id.clone(),
        name: payload.name.trim().to_string(),
        created_by: user.id,
        created_at: unix_seconds(),
    };
    let result = async {
        if !state.db.create_case(&case).await? {
            return Ok::<_, crate::StoreError>(None);
        }
        // The creator manages their own case through a PROFESSOR grant.
        state
            .db
            .upsert_case_access(user.id, &case_id, caseroom_model::Role::Professor, user.id)
            .await?;
        Ok(Some(()))
    }
    .await;

    let resp = match result {
        Ok(Some(())) => Json(json!({"case": case})).into_response(),
        Ok(None) => api_error_response(ApiError::validation_failed("case id already exists")),
        Err(e) => {
            error!("case create failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn list_cases_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let resp = match state.db.list_cases_for(&user).await {
        Ok(cases) => Json(json!({"cases": cases})).into_response(),
        Err(e) => {
            error!("case list failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn get_case_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let (case, held) =
        match require_case_role(&state.db, &user, &case_id, EffectiveRole::Student).await {
            Ok(v) => v,
            Err(e) => {
                let resp = gate_error_response(e);
                return finish(&state, route, started, &request_id, resp).await;
            }
        };
    let resp = match state.db.list_assistants(&case_id).await {
        Ok(assistants) => {
            let views: Vec<_> = assistants.iter().map(assistant_view).collect();
            Json(json!({"case": case, "role": held, "assistants": views})).into_response()
        }
        Err(e) => {
            error!("assistant list failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn delete_case_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) = require_case_management(&state.db, &user, &case_id).await {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let resp = match state.db.delete_case(&case_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error_response(ApiError::not_found("case")),
        Err(e) => {
            error!("case delete failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn list_access_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}/access";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) =
        require_case_role(&state.db, &user, &case_id, EffectiveRole::Professor).await
    {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let resp = match state.db.list_case_access(&case_id).await {
        Ok(rows) => Json(json!({"access": rows})).into_response(),
        Err(e) => {
            error!("access list failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn grant_access_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}/access";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let payload: GrantAccessRequest = match parse_json_body(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) =
        require_case_role(&state.db, &user, &case_id, EffectiveRole::Professor).await
    {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let email = match Email::parse(&payload.email) {
        Ok(v) => v,
        Err(_) => {
            let resp = api_error_response(ApiError::invalid_param("email", &payload.email));
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    let result = async {
        let target = state.db.upsert_user_by_email(&email, None).await?;
        state
            .db
            .upsert_case_access(target.id, &case_id, payload.role, user.id)
            .await?;
        Ok::<_, crate::StoreError>(target)
    }
    .await;
    let resp = match result {
        Ok(target) => Json(json!({"user": target, "role": payload.role})).into_response(),
        Err(e) => {
            error!("access grant failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn revoke_access_handler(
    State(state): State<AppState>,
    Path((case_id, user_id)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}/access/{user_id}";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) =
        require_case_role(&state.db, &user, &case_id, EffectiveRole::Professor).await
    {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let resp = match state.db.revoke_case_access(user_id, &case_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error_response(ApiError::not_found("access grant")),
        Err(e) => {
            error!("access revoke failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn list_users_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/users";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) = require_admin(&user) {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let resp = match state.db.list_users().await {
        Ok(users) => Json(json!({"users": users})).into_response(),
        Err(e) => {
            error!("user list failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn delete_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/users/{user_id}";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) = require_admin(&user) {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    // Children before parent; a second delete of the same id finds no row.
    let resp = match state.db.delete_user_cascade(user_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error_response(ApiError::not_found("user")),
        Err(e) => {
            error!("user delete failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn assign_admin_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/admin/case-access";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) = require_super_admin(&user) {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let payload: AdminAssignRequest = match parse_json_body(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&payload.case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let email = match Email::parse(&payload.email) {
        Ok(v) => v,
        Err(_) => {
            let resp = api_error_response(ApiError::invalid_param("email", &payload.email));
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    let result = async {
        let Some(target) = state.db.find_user_by_email(&email).await? else {
            return Ok(None);
        };
        if state.db.get_case(&case_id).await?.is_none() {
            return Ok(None);
        }
        state
            .db
            .upsert_admin_assignment(target.id, &case_id, user.id)
            .await?;
        Ok::<_, crate::StoreError>(Some(target))
    }
    .await;
    let resp = match result {
        Ok(Some(target)) => Json(json!({"user": target, "case_id": case_id})).into_response(),
        Ok(None) => api_error_response(ApiError::not_found("user or case")),
        Err(e) => {
            error!("admin assignment failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn list_admin_assignments_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/admin/case-access/{case_id}";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) = require_super_admin(&user) {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let resp = match state.db.list_admin_assignments(&case_id).await {
        Ok(rows) => Json(json!({"assignments": rows})).into_response(),
        Err(e) => {
            error!("admin assignment list failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn unassign_admin_handler(
    State(state): State<AppState>,
    Path((case_id, user_id)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/admin/case-access/{case_id}/{user_id}";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) = require_super_admin(&user) {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let resp = match state.db.revoke_admin_assignment(user_id, &case_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error_response(ApiError::not_found("admin assignment")),
        Err(e) => {
            error!("admin unassignment failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn list_assistants_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}/assistants";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) = require_case_role(&state.db, &user, &case_id, EffectiveRole::Student).await {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let resp = match state.db.list_assistants(&case_id).await {
        Ok(assistants) => {
            let views: Vec<_> = assistants.iter().map(assistant_view).collect();
            Json(json!({"assistants": views})).into_response()
        }
        Err(e) => {
            error!("assistant list failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}

pub(crate) async fn create_assistant_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}/assistants";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let payload: CreateAssistantRequest = match parse_json_body(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let case_id = match parse_case_id(&case_id) {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Err(e) =
        require_case_role(&state.db, &user, &case_id, EffectiveRole::Professor).await
    {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }
    let assistant_id = match caseroom_model::AssistantId::parse(&payload.id) {
        Ok(v) => v,
        Err(_) => {
            let resp = api_error_response(ApiError::invalid_param("id", &payload.id));
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if payload.name.trim().is_empty() {
        let resp =
            api_error_response(ApiError::validation_failed("assistant name must be non-empty"));
        return finish(&state, route, started, &request_id, resp).await;
    }

    let assistant = Assistant {
        id: assistant_id,
        case_id,
        name: payload.name.trim().to_string(),
        password_sha256: payload
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| sha256_hex(p.as_bytes())),
        created_at: unix_seconds(),
    };
    let resp = match state.db.create_assistant(&assistant).await {
        Ok(true) => Json(json!({"assistant": assistant_view(&assistant)})).into_response(),
        Ok(false) => api_error_response(ApiError::validation_failed("assistant id already exists")),
        Err(e) => {
            error!("assistant create failed: {e}");
            api_error_response(ApiError::upstream_failure())
        }
    };
    finish(&state, route, started, &request_id, resp).await
}
