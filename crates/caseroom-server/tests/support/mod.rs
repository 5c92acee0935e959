#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use caseroom_model::{Case, CaseId, Email};
use caseroom_server::db::unix_seconds;
use caseroom_server::{
    build_router, ApiConfig, AppState, Database, FakeCompletionBackend, FakeDocumentStore,
};

pub struct TestServer {
    pub addr: SocketAddr,
    pub db: Arc<Database>,
    pub docs: Arc<FakeDocumentStore>,
    pub completions: Arc<FakeCompletionBackend>,
    _tmp: tempfile::TempDir,
}

pub async fn start_test_server(api: ApiConfig) -> TestServer {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::new(tmp.path().join("caseroom.sqlite")));
    let docs = Arc::new(FakeDocumentStore::default());
    let completions = Arc::new(FakeCompletionBackend::default());
    let state = AppState::new(
        Arc::clone(&db),
        docs.clone(),
        completions.clone(),
        api,
    );
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve app");
    });

    TestServer {
        addr,
        db,
        docs,
        completions,
        _tmp: tmp,
    }
}

/// Seeds a user with the given flags and an unexpired session token.
pub async fn seed_user(
    db: &Database,
    email: &str,
    token: &str,
    is_admin: bool,
    is_super_admin: bool,
    can_create_cases: bool,
) -> i64 {
    let email = Email::parse(email).expect("seed email");
    let user = db
        .upsert_user_by_email(&email, None)
        .await
        .expect("seed user");
    db.set_user_flags(user.id, is_admin, is_super_admin, can_create_cases)
        .await
        .expect("seed flags");
    db.create_session(token, user.id, 3600)
        .await
        .expect("seed session");
    user.id
}

pub async fn seed_case(db: &Database, case_id: &str, created_by: i64) -> CaseId {
    let id = CaseId::parse(case_id).expect("seed case id");
    db.create_case(&Case {
        id: id.clone(),
        name: format!("Case {case_id}"),
        created_by,
        created_at: unix_seconds(),
    })
    .await
    .expect("seed case");
    id
}

/// One raw HTTP/1.1 exchange over a fresh connection. Returns the status
/// code and the full response text (headers included) so callers can
/// assert on both framing and body.
pub async fn raw_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<(&str, &str)>,
) -> (u16, String) {
    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    if let Some((content_type, payload)) = body {
        request.push_str(&format!(
            "Content-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{payload}",
            payload.len()
        ));
    } else {
        request.push_str("\r\n");
    }

    let mut stream = TcpStream::connect(addr).await.expect("connect server");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .expect("status line");
    (status, response)
}

pub fn response_body(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default()
}

/// Convenience wrapper for the common bearer-token request.
pub async fn request_with_auth(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<(&str, &str)>,
) -> (u16, String) {
    let auth;
    let mut headers: Vec<(&str, &str)> = Vec::new();
    if let Some(token) = token {
        auth = format!("Bearer {token}");
        headers.push(("authorization", &auth));
    }
    raw_request(addr, method, path, &headers, body).await
}
