// SPDX-License-Identifier: Apache-2.0

mod support;

use std::sync::atomic::Ordering;

use caseroom_api::wire::DeltaFrame;
use caseroom_model::{Assistant, AssistantId, CaseId, Role};
use caseroom_server::db::unix_seconds;
use caseroom_server::{ApiConfig, CompletionEvent};
use support::{request_with_auth, seed_case, seed_user, start_test_server, TestServer};

fn delta(text: &str) -> CompletionEvent {
    CompletionEvent::Delta(DeltaFrame {
        item_id: "msg_1".to_string(),
        output_index: 0,
        content_index: 0,
        delta: text.to_string(),
    })
}

async fn seed_case_with_assistant(server: &TestServer, password_sha256: Option<String>) {
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    let case_id = seed_case(&server.db, "fin-101", prof).await;
    let student =
        seed_user(&server.db, "s@example.edu", "student-token", false, false, false).await;
    server
        .db
        .upsert_case_access(student, &case_id, Role::Student, prof)
        .await
        .expect("student grant");
    server
        .db
        .create_assistant(&Assistant {
            id: AssistantId::parse("tutor").expect("assistant id"),
            case_id,
            name: "Tutor".to_string(),
            password_sha256,
            created_at: unix_seconds(),
        })
        .await
        .expect("assistant");
}

async fn seed_instruction_document(server: &TestServer, key: &str) {
    server
        .docs
        .documents
        .lock()
        .await
        .insert(key.to_string(), "You are the case tutor.".to_string());
}

const CHAT_BODY: &str =
    r#"{"prompt":"What is NPV?","assistant_id":"tutor","case_id":"fin-101"}"#;

#[tokio::test]
async fn missing_instruction_document_is_404_before_any_upstream_call() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", CHAT_BODY)),
    )
    .await;
    assert_eq!(status, 404);
    // All three path conventions were consulted; the upstream never was.
    assert_eq!(server.docs.fetch_calls.load(Ordering::Relaxed), 3);
    assert_eq!(server.completions.stream_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn delta_frames_relay_verbatim_and_in_order() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;
    seed_instruction_document(&server, "assistants/tutor.md").await;
    *server.completions.scripted.lock().await = vec![delta("Net "), delta("present "), delta("value")];

    let (status, response) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", CHAT_BODY)),
    )
    .await;
    assert_eq!(status, 200);
    assert!(response.contains("content-type: text/event-stream"));
    assert!(response.contains("cache-control: no-cache"));

    let first = response
        .find(r#"{"item_id":"msg_1","output_index":0,"content_index":0,"delta":"Net "}"#)
        .expect("first frame present");
    let second = response
        .find(r#"{"item_id":"msg_1","output_index":0,"content_index":0,"delta":"present "}"#)
        .expect("second frame present");
    let third = response
        .find(r#"{"item_id":"msg_1","output_index":0,"content_index":0,"delta":"value"}"#)
        .expect("third frame present");
    assert!(first < second && second < third, "frames must keep upstream order");
    assert!(!response.contains(r#"{"error""#));
}

#[tokio::test]
async fn upstream_error_mid_flight_yields_exactly_one_error_frame() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;
    seed_instruction_document(&server, "assistants/tutor.md").await;
    *server.completions.scripted.lock().await = vec![
        delta("partial"),
        CompletionEvent::Error("upstream stream interrupted".to_string()),
    ];

    let (status, response) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", CHAT_BODY)),
    )
    .await;
    assert_eq!(status, 200);
    let delta_pos = response.find(r#""delta":"partial""#).expect("delta frame");
    let error_pos = response
        .find(r#"{"error":"upstream stream interrupted"}"#)
        .expect("error frame");
    assert!(delta_pos < error_pos);
    assert_eq!(response.matches(r#"{"error""#).count(), 1);
}

#[tokio::test]
async fn history_and_fresh_prompt_are_mutually_exclusive_framings() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;
    seed_instruction_document(&server, "assistants/tutor.md").await;
    *server.completions.scripted.lock().await = vec![delta("ok")];

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", CHAT_BODY)),
    )
    .await;
    assert_eq!(status, 200);
    {
        let messages = server.completions.last_messages.lock().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "You are the case tutor.");
        assert_eq!(messages[1].role, "user");
    }

    let body = r#"{"prompt":"And IRR?","assistant_id":"tutor","case_id":"fin-101","message_history":[{"role":"user","content":"What is NPV?"},{"role":"assistant","content":"Net present value."}]}"#;
    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", body)),
    )
    .await;
    assert_eq!(status, 200);
    let messages = server.completions.last_messages.lock().await;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[1].content, "What is NPV?");
    assert_eq!(messages[2].role, "assistant");
    assert_eq!(messages[3].content, "And IRR?");
}

#[tokio::test]
async fn earlier_path_conventions_shadow_later_ones() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;
    seed_instruction_document(&server, "public/markdown/fin-101-tutor.md").await;
    server
        .docs
        .documents
        .lock()
        .await
        .insert("assistants/tutor.md".to_string(), "shadowed".to_string());
    *server.completions.scripted.lock().await = vec![delta("ok")];

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", CHAT_BODY)),
    )
    .await;
    assert_eq!(status, 200);
    let messages = server.completions.last_messages.lock().await;
    assert_eq!(messages[0].content, "You are the case tutor.");
}

#[tokio::test]
async fn password_gated_assistant_rejects_bad_and_missing_passwords() {
    let server = start_test_server(ApiConfig::default()).await;
    let digest = caseroom_core::sha256_hex(b"open-sesame");
    seed_case_with_assistant(&server, Some(digest)).await;
    seed_instruction_document(&server, "assistants/tutor.md").await;
    *server.completions.scripted.lock().await = vec![delta("ok")];

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", CHAT_BODY)),
    )
    .await;
    assert_eq!(status, 403);

    let wrong = r#"{"prompt":"hi","assistant_id":"tutor","case_id":"fin-101","password":"nope"}"#;
    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", wrong)),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(server.completions.stream_calls.load(Ordering::Relaxed), 0);

    let right =
        r#"{"prompt":"hi","assistant_id":"tutor","case_id":"fin-101","password":"open-sesame"}"#;
    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", right)),
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn unknown_assistant_is_404() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;

    let body = r#"{"prompt":"hi","assistant_id":"ghost","case_id":"fin-101"}"#;
    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", body)),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(server.completions.stream_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn chat_requires_a_case_grant() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;
    seed_user(&server.db, "plain@example.edu", "plain-token", false, false, false).await;
    seed_instruction_document(&server, "assistants/tutor.md").await;

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("plain-token"),
        Some(("application/json", CHAT_BODY)),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(server.completions.stream_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn empty_prompt_is_400() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;

    let body = r#"{"prompt":"  ","assistant_id":"tutor","case_id":"fin-101"}"#;
    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/chat",
        Some("student-token"),
        Some(("application/json", body)),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn delete_case_is_204_with_no_body() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    let case_id = seed_case(&server.db, "del-case", prof).await;
    server
        .db
        .upsert_case_access(prof, &case_id, Role::Professor, prof)
        .await
        .expect("grant");

    let (status, response) = request_with_auth(
        server.addr,
        "DELETE",
        "/v1/cases/del-case",
        Some("prof-token"),
        None,
    )
    .await;
    assert_eq!(status, 204);
    assert!(support::response_body(&response).is_empty());

    let (status, _) = request_with_auth(
        server.addr,
        "GET",
        "/v1/cases/del-case",
        Some("prof-token"),
        None,
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn assistants_are_scoped_to_their_case() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_case_with_assistant(&server, None).await;
    let prof2 = seed_user(&server.db, "p2@example.edu", "p2-token", false, false, true).await;
    let other = seed_case(&server.db, "other-case", prof2).await;
    server
        .db
        .upsert_case_access(prof2, &other, Role::Professor, prof2)
        .await
        .expect("grant");

    // The tutor assistant belongs to fin-101 only.
    assert!(server
        .db
        .get_assistant(&other, &AssistantId::parse("tutor").expect("id"))
        .await
        .expect("lookup")
        .is_none());
    assert!(server
        .db
        .get_assistant(
            &CaseId::parse("fin-101").expect("id"),
            &AssistantId::parse("tutor").expect("id")
        )
        .await
        .expect("lookup")
        .is_some());
}
