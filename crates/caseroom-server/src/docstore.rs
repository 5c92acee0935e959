// SPDX-License-Identifier: Apache-2.0

//! Instruction document storage.
//!
//! Documents live either on the local filesystem or behind an S3-like HTTP
//! object store; both backends answer the same question: does this key
//! exist, and what does it say. A missing document is `Ok(None)`, never an
//! error: the resolution order in `resolve_instructions` depends on being
//! able to fall through cleanly.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::instrument;

use caseroom_model::{instruction_candidates, AssistantId, CaseId};

use crate::StoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
        }
    }
}

#[async_trait]
pub trait DocumentStoreBackend: Send + Sync + 'static {
    fn backend_tag(&self) -> &'static str;
    async fn fetch_document(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Walks the fixed path conventions in order; first hit wins. A miss on all
/// three is terminal for the caller; there is no retry at this level.
pub async fn resolve_instructions(
    store: &dyn DocumentStoreBackend,
    case_id: &CaseId,
    assistant_id: &AssistantId,
) -> Result<Option<String>, StoreError> {
    for key in instruction_candidates(case_id, assistant_id) {
        if let Some(document) = store.fetch_document(&key).await? {
            return Ok(Some(document));
        }
    }
    Ok(None)
}

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn safe_join(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError("path traversal blocked".to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStoreBackend for LocalFsBackend {
    fn backend_tag(&self) -> &'static str {
        "localfs"
    }

    async fn fetch_document(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.safe_join(key)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError(format!("document read failed: {e}"))),
        }
    }
}

pub struct S3LikeBackend {
    base_url: String,
    auth_bearer: Option<String>,
    retry: RetryPolicy,
    allow_private_hosts: bool,
}

impl S3LikeBackend {
    #[must_use]
    pub fn new(
        base_url: String,
        auth_bearer: Option<String>,
        retry: RetryPolicy,
        allow_private_hosts: bool,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_bearer,
            retry,
            allow_private_hosts,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    }

    fn validate_url(&self, url: &str) -> Result<(), StoreError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| StoreError(format!("invalid store url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| StoreError("store url missing host".to_string()))?
            .to_ascii_lowercase();
        if !self.allow_private_hosts && (host == "localhost" || host.ends_with(".localhost")) {
            return Err(StoreError("blocked store host: localhost".to_string()));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            let private = match ip {
                IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
                IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || v6.is_unique_local(),
            };
            if private && !self.allow_private_hosts {
                return Err(StoreError("blocked private store host".to_string()));
            }
        }
        Ok(())
    }

    #[instrument(name = "docstore_get_with_retry", skip(self))]
    async fn get_with_retry(&self, url: &str) -> Result<Option<String>, StoreError> {
        self.validate_url(url)?;
        let client = self.client();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut req = client.get(url);
            if let Some(token) = &self.auth_bearer {
                req = req.bearer_auth(token);
            }
            match req.send().await {
                // A 404 is a clean miss, not a transport failure; the
                // resolution order falls through to the next convention.
                Ok(resp) if resp.status().as_u16() == 404 => return Ok(None),
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .text()
                        .await
                        .map(Some)
                        .map_err(|e| StoreError(format!("read body failed: {e}")));
                }
                Ok(resp) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(StoreError(format!(
                            "document fetch failed status={} url={url}",
                            resp.status()
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(StoreError(format!("document fetch failed url={url}: {e}")));
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(
                self.retry.base_backoff_ms.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }
}

#[async_trait]
impl DocumentStoreBackend for S3LikeBackend {
    fn backend_tag(&self) -> &'static str {
        "http_s3"
    }

    async fn fetch_document(&self, key: &str) -> Result<Option<String>, StoreError> {
        let url = self.object_url(key);
        self.get_with_retry(&url).await
    }
}

#[derive(Default)]
pub struct FakeDocumentStore {
    pub documents: Mutex<HashMap<String, String>>,
    pub fetch_calls: AtomicU64,
}

#[async_trait]
impl DocumentStoreBackend for FakeDocumentStore {
    fn backend_tag(&self) -> &'static str {
        "fake"
    }

    async fn fetch_document(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.fetch_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(self.documents.lock().await.get(key).cloned())
    }
}
