// SPDX-License-Identifier: Apache-2.0

//! Roster import endpoints.
//!
//! The student-add endpoint accepts two encodings, resolved once at the
//! boundary into a tagged input; everything downstream dispatches on the
//! variant, never on headers. Rows are issued as concurrent upserts and
//! awaited together; a bad row is recorded in the report and never aborts
//! its siblings.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::join_all;
use serde_json::json;
use tracing::error;

use caseroom_api::dto::{AddStudentsInput, AddStudentsRequest, ImportReport};
use caseroom_api::ApiError;
use caseroom_model::roster::{decode_headered, decode_headerless, RosterRow};
use caseroom_model::{CaseId, Email, EffectiveRole, Role};

use crate::access::{require_case_role, resolve_identity};
use crate::http::handlers::{
    api_error_response, finish, gate_error_response, parse_case_id, propagated_request_id,
};
use crate::AppState;

/// Per-row upsert fan-out. Every row independently upserts the user by
/// email, then the (user, case) grant; failures are isolated per row and
/// the report counts match the input exactly.
async fn import_students(
    state: &AppState,
    case_id: &CaseId,
    added_by: i64,
    rows: Vec<RosterRow>,
) -> ImportReport {
    let futures: Vec<_> = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| {
            let db = Arc::clone(&state.db);
            let case_id = case_id.clone();
            async move {
                let line = idx + 1;
                let email =
                    Email::parse(&row.email).map_err(|e| format!("row {line}: {e}"))?;
                let user = db
                    .upsert_user_by_email(&email, row.username.as_deref())
                    .await
                    .map_err(|e| {
                        error!("roster user upsert failed: {e}");
                        format!("row {line}: store failure")
                    })?;
                db.upsert_case_access(user.id, &case_id, Role::Student, added_by)
                    .await
                    .map_err(|e| {
                        error!("roster access upsert failed: {e}");
                        format!("row {line}: store failure")
                    })?;
                Ok::<(), String>(())
            }
        })
        .collect();

    let mut report = ImportReport::default();
    for result in join_all(futures).await {
        match result {
            Ok(()) => report.record_success(),
            Err(message) => report.record_failure(message),
        }
    }
    report
}

async fn resolve_add_students_input(
    state: &AppState,
    req: Request,
) -> Result<AddStudentsInput, ApiError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let bytes = axum::body::to_bytes(req.into_body(), state.api.max_body_bytes)
            .await
            .map_err(|_| ApiError::validation_failed("unreadable request body"))?;
        let parsed: AddStudentsRequest = serde_json::from_slice(&bytes)
            .map_err(|_| ApiError::validation_failed("malformed json body"))?;
        return Ok(AddStudentsInput::Json(parsed));
    }

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|_| ApiError::validation_failed("malformed multipart body"))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|_| ApiError::validation_failed("malformed multipart body"))?
        {
            if field.name() == Some("file") {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::validation_failed("unreadable csv upload"))?;
                return Ok(AddStudentsInput::Csv(text));
            }
        }
        return Err(ApiError::validation_failed("missing csv file field"));
    }

    Err(ApiError::validation_failed("unsupported content type"))
}

fn rows_from_input(input: AddStudentsInput) -> Result<Vec<RosterRow>, ApiError> {
    let rows = match input {
        AddStudentsInput::Json(request) => request
            .emails
            .into_iter()
            .map(|email| RosterRow {
                email,
                username: None,
            })
            .collect::<Vec<_>>(),
        AddStudentsInput::Csv(text) => {
            decode_headered(&text).map_err(|e| ApiError::validation_failed(&e.0))?
        }
    };
    if rows.is_empty() {
        return Err(ApiError::validation_failed("empty email set"));
    }
    Ok(rows)
}

pub(crate) async fn add_students_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    req: Request,
) -> Response {
    let started = Instant::now();
    let headers = req.headers().clone();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}/students";

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

    let rows = match resolve_add_students_input(&state, req)
        .await
        .and_then(rows_from_input)
    {
        Ok(v) => v,
        Err(e) => {
            let resp = api_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    let report = import_students(&state, &case_id, user.id, rows).await;
    let resp = Json(json!(report)).into_response();
    finish(&state, route, started, &request_id, resp).await
}

/// Single-purpose roster upload: raw CSV body, no header, first column is
/// the email. Rows without an '@' are dropped before import.
pub(crate) async fn upload_roster_handler(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: axum::http::HeaderMap,
    body: String,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/cases/{case_id}/roster";

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

    let rows = decode_headerless(&body);
    if rows.is_empty() {
        let resp = api_error_response(ApiError::validation_failed("empty email set"));
        return finish(&state, route, started, &request_id, resp).await;
    }

    let report = import_students(&state, &case_id, user.id, rows).await;
    let resp = Json(json!(report)).into_response();
    finish(&state, route, started, &request_id, resp).await
}
