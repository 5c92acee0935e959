// SPDX-License-Identifier: Apache-2.0

//! Upstream completion client.
//!
//! The relay forwards whatever the completion API emits, one event per
//! delta, in arrival order. Decoding stops at re-framing: deltas are never
//! merged, split, or reordered. A mid-flight upstream failure surfaces as
//! exactly one error event and ends the stream; nothing is resumed or
//! retried.

use std::sync::atomic::AtomicU64;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use caseroom_api::dto::ChatMessage;
use caseroom_api::wire::DeltaFrame;

use crate::config::RelayConfig;

#[derive(Debug)]
pub struct RelayError(pub String);

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for RelayError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    Delta(DeltaFrame),
    Error(String),
}

#[async_trait]
pub trait CompletionBackend: Send + Sync + 'static {
    fn backend_tag(&self) -> &'static str;

    /// Opens the upstream stream. The receiver yields events in upstream
    /// order; channel closure is the end-of-stream signal. Errors here are
    /// connection-establishment failures, mapped to 500 by the handler.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<CompletionEvent>, RelayError>;
}

pub struct HttpCompletionBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    channel_capacity: usize,
}

impl HttpCompletionBackend {
    #[must_use]
    pub fn new(cfg: &RelayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: cfg.upstream_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            channel_capacity: cfg.channel_capacity,
        }
    }
}

/// One decoded upstream SSE line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UpstreamLine {
    Delta(DeltaFrame),
    Done,
    Skip,
}

/// Upstream frames carry extra bookkeeping fields; only the delta envelope
/// is extracted. Anything unrecognized (keep-alive comments, lifecycle
/// events) is skipped, not an error.
pub(crate) fn decode_upstream_line(line: &str) -> UpstreamLine {
    let Some(payload) = line.strip_prefix("data:") else {
        return UpstreamLine::Skip;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return UpstreamLine::Skip;
    }
    if payload == "[DONE]" {
        return UpstreamLine::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return UpstreamLine::Skip;
    };
    let Some(delta) = value.get("delta").and_then(Value::as_str) else {
        return UpstreamLine::Skip;
    };
    UpstreamLine::Delta(DeltaFrame {
        item_id: value
            .get("item_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        output_index: value
            .get("output_index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        content_index: value
            .get("content_index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        delta: delta.to_string(),
    })
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    fn backend_tag(&self) -> &'static str {
        "http"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<CompletionEvent>, RelayError> {
        let url = format!("{}/responses", self.base_url);
        let body = json!({
            "model": self.model,
            "stream": true,
            "input": messages,
        });
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| RelayError(format!("upstream connect failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(RelayError(format!(
                "upstream rejected request: status={}",
                resp.status()
            )));
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            loop {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(newline) = buffer.find('\n') {
                            let line: String = buffer.drain(..=newline).collect();
                            match decode_upstream_line(line.trim_end()) {
                                UpstreamLine::Delta(frame) => {
                                    // A failed send means the client side is
                                    // gone; returning drops the upstream
                                    // response and closes the stream.
                                    if tx.send(CompletionEvent::Delta(frame)).await.is_err() {
                                        return;
                                    }
                                }
                                UpstreamLine::Done => return,
                                UpstreamLine::Skip => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("upstream stream error: {e}");
                        let _ = tx
                            .send(CompletionEvent::Error(
                                "upstream stream interrupted".to_string(),
                            ))
                            .await;
                        return;
                    }
                    None => {
                        debug!("upstream stream closed");
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Test double: replays a scripted event sequence, counts stream opens,
/// and remembers the message list it was handed.
#[derive(Default)]
pub struct FakeCompletionBackend {
    pub scripted: Mutex<Vec<CompletionEvent>>,
    pub last_messages: Mutex<Vec<ChatMessage>>,
    pub stream_calls: AtomicU64,
}

#[async_trait]
impl CompletionBackend for FakeCompletionBackend {
    fn backend_tag(&self) -> &'static str {
        "fake"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<CompletionEvent>, RelayError> {
        self.stream_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        *self.last_messages.lock().await = messages.to_vec();
        let events = self.scripted.lock().await.clone();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_extracts_the_delta_envelope() {
        let line = r#"data: {"type":"response.output_text.delta","item_id":"msg_1","output_index":0,"content_index":0,"delta":"Hel","sequence_number":3}"#;
        assert_eq!(
            decode_upstream_line(line),
            UpstreamLine::Delta(DeltaFrame {
                item_id: "msg_1".to_string(),
                output_index: 0,
                content_index: 0,
                delta: "Hel".to_string(),
            })
        );
    }

    #[test]
    fn decode_skips_noise_and_recognizes_done() {
        assert_eq!(decode_upstream_line(": keep-alive"), UpstreamLine::Skip);
        assert_eq!(decode_upstream_line(""), UpstreamLine::Skip);
        assert_eq!(decode_upstream_line("data:"), UpstreamLine::Skip);
        assert_eq!(decode_upstream_line("data: [DONE]"), UpstreamLine::Done);
        assert_eq!(
            decode_upstream_line(r#"data: {"type":"response.created"}"#),
            UpstreamLine::Skip
        );
        assert_eq!(decode_upstream_line("data: not-json"), UpstreamLine::Skip);
    }

    #[tokio::test]
    async fn fake_backend_replays_events_in_order() {
        let backend = FakeCompletionBackend::default();
        *backend.scripted.lock().await = vec![
            CompletionEvent::Delta(DeltaFrame {
                item_id: "m".to_string(),
                output_index: 0,
                content_index: 0,
                delta: "a".to_string(),
            }),
            CompletionEvent::Delta(DeltaFrame {
                item_id: "m".to_string(),
                output_index: 0,
                content_index: 0,
                delta: "b".to_string(),
            }),
        ];
        let mut rx = backend.stream_chat(&[]).await.expect("stream");
        let first = rx.recv().await.expect("first event");
        let second = rx.recv().await.expect("second event");
        assert!(rx.recv().await.is_none());
        match (first, second) {
            (CompletionEvent::Delta(a), CompletionEvent::Delta(b)) => {
                assert_eq!(a.delta, "a");
                assert_eq!(b.delta, "b");
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(
            backend
                .stream_calls
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
