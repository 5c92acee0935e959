// SPDX-License-Identifier: Apache-2.0

mod support;

use caseroom_server::ApiConfig;
use serde_json::Value;
use support::{
    raw_request, request_with_auth, response_body, seed_case, seed_user, start_test_server,
};

#[tokio::test]
async fn unauthenticated_mutating_requests_are_401_and_mutate_nothing() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/cases",
        None,
        Some(("application/json", r#"{"id":"fin-101","name":"Finance"}"#)),
    )
    .await;
    assert_eq!(status, 401);

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/cases/fin-101/students",
        None,
        Some(("application/json", r#"{"emails":["x@example.edu"]}"#)),
    )
    .await;
    assert_eq!(status, 401);

    let (status, _) =
        request_with_auth(server.addr, "DELETE", &format!("/v1/users/{prof}"), None, None).await;
    assert_eq!(status, 401);

    // Nothing was created and nobody was deleted.
    let (status, response) =
        request_with_auth(server.addr, "GET", "/v1/cases", Some("prof-token"), None).await;
    assert_eq!(status, 200);
    let parsed: Value = serde_json::from_str(response_body(&response)).expect("json body");
    assert_eq!(parsed["cases"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn caller_without_grant_or_flags_is_403_not_401() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    seed_user(&server.db, "plain@example.edu", "plain-token", false, false, false).await;
    seed_case(&server.db, "fin-101", prof).await;

    let (status, _) =
        request_with_auth(server.addr, "GET", "/v1/cases/fin-101", Some("plain-token"), None).await;
    assert_eq!(status, 403);

    let (status, _) = request_with_auth(server.addr, "GET", "/v1/cases/fin-101", None, None).await;
    assert_eq!(status, 401);

    // A bogus token is also 401: no identity, not a role failure.
    let (status, _) =
        request_with_auth(server.addr, "GET", "/v1/cases/fin-101", Some("forged"), None).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn admin_flags_grant_implicit_access_without_rows() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    seed_user(&server.db, "admin@example.edu", "admin-token", true, false, false).await;
    seed_case(&server.db, "fin-101", prof).await;

    let (status, _) =
        request_with_auth(server.addr, "GET", "/v1/cases/fin-101", Some("admin-token"), None)
            .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn regranting_overwrites_the_role_in_a_single_row() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    let case_id = seed_case(&server.db, "fin-101", prof).await;
    server
        .db
        .upsert_case_access(prof, &case_id, caseroom_model::Role::Professor, prof)
        .await
        .expect("professor grant");

    for role in ["STUDENT", "PROFESSOR"] {
        let body = format!(r#"{{"email":"s@example.edu","role":"{role}"}}"#);
        let (status, _) = request_with_auth(
            server.addr,
            "POST",
            "/v1/cases/fin-101/access",
            Some("prof-token"),
            Some(("application/json", &body)),
        )
        .await;
        assert_eq!(status, 200);
    }

    let (status, response) = request_with_auth(
        server.addr,
        "GET",
        "/v1/cases/fin-101/access",
        Some("prof-token"),
        None,
    )
    .await;
    assert_eq!(status, 200);
    let parsed: Value = serde_json::from_str(response_body(&response)).expect("json body");
    let rows = parsed["access"].as_array().expect("access rows");
    let student_rows: Vec<&Value> = rows
        .iter()
        .filter(|row| row["user_id"] != Value::from(prof))
        .collect();
    assert_eq!(student_rows.len(), 1);
    assert_eq!(student_rows[0]["role"], "PROFESSOR");
}

#[tokio::test]
async fn deleting_a_user_cascades_and_second_delete_is_404() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    seed_user(&server.db, "root@example.edu", "root-token", true, true, true).await;
    let student =
        seed_user(&server.db, "s@example.edu", "student-token", false, false, false).await;
    let case_id = seed_case(&server.db, "fin-101", prof).await;
    server
        .db
        .upsert_case_access(student, &case_id, caseroom_model::Role::Student, prof)
        .await
        .expect("grant");
    server
        .db
        .upsert_admin_assignment(student, &case_id, prof)
        .await
        .expect("assignment");

    let (status, _) = request_with_auth(
        server.addr,
        "DELETE",
        &format!("/v1/users/{student}"),
        Some("root-token"),
        None,
    )
    .await;
    assert_eq!(status, 204);
    assert_eq!(
        server
            .db
            .access_rows_for_user(student)
            .await
            .expect("count"),
        0
    );

    let (status, _) = request_with_auth(
        server.addr,
        "DELETE",
        &format!("/v1/users/{student}"),
        Some("root-token"),
        None,
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn case_management_requires_assignment_for_plain_admins() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    let admin =
        seed_user(&server.db, "admin@example.edu", "admin-token", true, false, false).await;
    seed_user(&server.db, "root@example.edu", "root-token", true, true, true).await;
    seed_case(&server.db, "fin-101", prof).await;

    let (status, _) = request_with_auth(
        server.addr,
        "DELETE",
        "/v1/cases/fin-101",
        Some("admin-token"),
        None,
    )
    .await;
    assert_eq!(status, 403);

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/admin/case-access",
        Some("root-token"),
        Some((
            "application/json",
            r#"{"email":"admin@example.edu","case_id":"fin-101"}"#,
        )),
    )
    .await;
    assert_eq!(status, 200);

    let (status, _) = request_with_auth(
        server.addr,
        "DELETE",
        "/v1/cases/fin-101",
        Some("admin-token"),
        None,
    )
    .await;
    assert_eq!(status, 204);

    // Deleting the case removed its admin assignments with it.
    let (status, _) = request_with_auth(
        server.addr,
        "DELETE",
        &format!("/v1/admin/case-access/fin-101/{admin}"),
        Some("root-token"),
        None,
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn admin_assignment_endpoint_is_super_admin_only() {
    let server = start_test_server(ApiConfig::default()).await;
    let prof = seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;
    seed_user(&server.db, "admin@example.edu", "admin-token", true, false, false).await;
    seed_case(&server.db, "fin-101", prof).await;

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/admin/case-access",
        Some("admin-token"),
        Some((
            "application/json",
            r#"{"email":"admin@example.edu","case_id":"fin-101"}"#,
        )),
    )
    .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn session_endpoint_mints_usable_tokens_behind_shared_secret() {
    let api = ApiConfig {
        sso_shared_secret: Some("callback-secret".to_string()),
        ..ApiConfig::default()
    };
    let server = start_test_server(api).await;

    // Wrong secret never mints.
    let (status, _) = raw_request(
        server.addr,
        "POST",
        "/v1/sessions",
        &[("x-caseroom-sso-secret", "wrong")],
        Some(("application/json", r#"{"email":"new@example.edu"}"#)),
    )
    .await;
    assert_eq!(status, 403);

    let (status, response) = raw_request(
        server.addr,
        "POST",
        "/v1/sessions",
        &[("x-caseroom-sso-secret", "callback-secret")],
        Some(("application/json", r#"{"email":"new@example.edu"}"#)),
    )
    .await;
    assert_eq!(status, 200);
    let parsed: Value = serde_json::from_str(response_body(&response)).expect("json body");
    let token = parsed["token"].as_str().expect("token");
    assert_eq!(parsed["user"]["email"], "new@example.edu");

    let (status, _) = request_with_auth(server.addr, "GET", "/v1/cases", Some(token), None).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn malformed_json_payloads_are_400() {
    let server = start_test_server(ApiConfig::default()).await;
    seed_user(&server.db, "prof@example.edu", "prof-token", false, false, true).await;

    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/cases",
        Some("prof-token"),
        Some(("application/json", r#"{"id":"fin-101","name":"#)),
    )
    .await;
    assert_eq!(status, 400);

    // Unknown fields are malformed input too, not silently dropped.
    let (status, _) = request_with_auth(
        server.addr,
        "POST",
        "/v1/cases",
        Some("prof-token"),
        Some((
            "application/json",
            r#"{"id":"fin-101","name":"Finance","extra":true}"#,
        )),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn session_endpoint_is_404_when_not_configured() {
    let server = start_test_server(ApiConfig::default()).await;
    let (status, _) = raw_request(
        server.addr,
        "POST",
        "/v1/sessions",
        &[("x-caseroom-sso-secret", "anything")],
        Some(("application/json", r#"{"email":"new@example.edu"}"#)),
    )
    .await;
    assert_eq!(status, 404);
}
