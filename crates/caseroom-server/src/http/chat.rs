// SPDX-License-Identifier: Apache-2.0

//! The streaming relay.
//!
//! The handler settles everything that can fail (identity, role, assistant
//! password, instruction document) before the upstream call is opened. A
//! miss on all three document paths is a terminal 404 with zero upstream
//! calls. Once the upstream stream is open, each delta is re-framed as one
//! SSE event, verbatim and in order; the only transformation is the JSON
//! envelope.

use std::convert::Infallible;
use std::time::Instant;

use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use caseroom_api::dto::{compose_messages, ChatRequest};
use caseroom_api::wire::ErrorFrame;
use caseroom_api::ApiError;
use caseroom_core::sha256_hex;
use caseroom_model::{AssistantId, EffectiveRole};

use crate::access::{require_case_role, resolve_identity};
use crate::docstore::resolve_instructions;
use crate::http::handlers::{
    api_error_response, finish, gate_error_response, parse_case_id, parse_json_body,
    propagated_request_id, with_request_id,
};
use crate::relay::CompletionEvent;
use crate::AppState;

pub(crate) async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = propagated_request_id(&headers, &state);
    let route = "/v1/chat";

    let user = match resolve_identity(&state.db, &headers).await {
        Ok(v) => v,
        Err(e) => {
            let resp = gate_error_response(e);
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    let payload: ChatRequest = match parse_json_body(&body) {
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
    let assistant_id = match AssistantId::parse(&payload.assistant_id) {
        Ok(v) => v,
        Err(_) => {
            let resp =
                api_error_response(ApiError::invalid_param("assistant_id", &payload.assistant_id));
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if payload.prompt.trim().is_empty() {
        let resp = api_error_response(ApiError::validation_failed("prompt must be non-empty"));
        return finish(&state, route, started, &request_id, resp).await;
    }

    if let Err(e) = require_case_role(&state.db, &user, &case_id, EffectiveRole::Student).await {
        let resp = gate_error_response(e);
        return finish(&state, route, started, &request_id, resp).await;
    }

    let assistant = match state.db.get_assistant(&case_id, &assistant_id).await {
        Ok(Some(v)) => v,
        Ok(None) => {
            let resp = api_error_response(ApiError::not_found("assistant"));
            return finish(&state, route, started, &request_id, resp).await;
        }
        Err(e) => {
            error!("assistant lookup failed: {e}");
            let resp = api_error_response(ApiError::upstream_failure());
            return finish(&state, route, started, &request_id, resp).await;
        }
    };
    if let Some(expected) = &assistant.password_sha256 {
        let presented = payload
            .password
            .as_deref()
            .map(|p| sha256_hex(p.as_bytes()));
        if presented.as_deref() != Some(expected.as_str()) {
            let resp = api_error_response(ApiError::forbidden("assistant password"));
            return finish(&state, route, started, &request_id, resp).await;
        }
    }

    // Instruction resolution is the last gate before the upstream call; a
    // miss on all three paths must leave the upstream untouched.
    let instructions = match resolve_instructions(
        state.documents.as_ref(),
        &case_id,
        &assistant_id,
    )
    .await
    {
        Ok(Some(v)) => v,
        Ok(None) => {
            let resp = api_error_response(ApiError::not_found("instruction document"));
            return finish(&state, route, started, &request_id, resp).await;
        }
        Err(e) => {
            error!("instruction resolution failed: {e}");
            let resp = api_error_response(ApiError::upstream_failure());
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    let messages = compose_messages(
        &instructions,
        payload.message_history.as_deref(),
        &payload.prompt,
    );
    let upstream = match state.completions.stream_chat(&messages).await {
        Ok(v) => v,
        Err(e) => {
            error!("upstream completion open failed: {e}");
            let resp = api_error_response(ApiError::upstream_failure());
            return finish(&state, route, started, &request_id, resp).await;
        }
    };

    info!(
        request_id = %request_id,
        case = %case_id,
        assistant = %assistant_id,
        "relay stream start"
    );

    // One SSE frame per upstream event. Dropping this stream on client
    // disconnect drops the receiver; the relay task notices on its next
    // send and closes the upstream stream.
    let stream = ReceiverStream::new(upstream).map(|event| {
        let frame = match event {
            CompletionEvent::Delta(delta) => serde_json::to_string(&delta),
            CompletionEvent::Error(message) => {
                serde_json::to_string(&ErrorFrame { error: message })
            }
        }
        .unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, Infallible>(Event::default().data(frame))
    });

    let mut resp = Sse::new(stream).into_response();
    resp.headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    state
        .metrics
        .observe_request(route, StatusCode::OK, started.elapsed())
        .await;
    with_request_id(resp, &request_id)
}
