// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tokio::sync::Mutex;

use crate::AppState;

#[derive(Default)]
pub(crate) struct RequestMetrics {
    counts: Mutex<HashMap<(String, u16), u64>>,
    latency_ns: Mutex<HashMap<String, Vec<u64>>>,
}

impl RequestMetrics {
    pub(crate) async fn observe_request(&self, route: &str, status: StatusCode, latency: Duration) {
        let mut counts = self.counts.lock().await;
        *counts
            .entry((route.to_string(), status.as_u16()))
            .or_insert(0) += 1;
        drop(counts);
        let mut latency_map = self.latency_ns.lock().await;
        latency_map
            .entry(route.to_string())
            .or_default()
            .push(latency.as_nanos() as u64);
    }
}

fn percentile_ns(samples: &[u64], q: f64) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut v: Vec<u64> = samples.to_vec();
    v.sort_unstable();
    let idx = ((v.len() as f64) * q).ceil() as usize;
    v[idx.saturating_sub(1).min(v.len() - 1)]
}

pub(crate) async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = String::new();
    let counts = state.metrics.counts.lock().await.clone();
    let mut count_rows: Vec<_> = counts.into_iter().collect();
    count_rows.sort();
    for ((route, status), count) in count_rows {
        body.push_str(&format!(
            "caseroom_http_requests_total{{route=\"{route}\",status=\"{status}\"}} {count}\n"
        ));
    }
    let latency = state.metrics.latency_ns.lock().await.clone();
    let mut latency_rows: Vec<_> = latency.into_iter().collect();
    latency_rows.sort_by(|a, b| a.0.cmp(&b.0));
    for (route, samples) in latency_rows {
        body.push_str(&format!(
            "caseroom_http_request_latency_p95_seconds{{route=\"{route}\"}} {:.6}\n",
            percentile_ns(&samples, 0.95) as f64 / 1_000_000_000.0
        ));
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
