use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    config::{DEFAULT_TRACK_CAP, DEFAULT_TRACK_TIMEOUT},
    dispatcher::{ProgressEvent, DEFAULT_CONCURRENCY},
    sampler::{AddressBlock, SampleCap},
    target::TargetTemplate,
    tracker::{self, TargetSource, TrackRequest},
    types::{BatchReport, Verdict},
};

#[derive(Clone)]
pub struct AppState {
    blocks: Arc<Vec<AddressBlock>>,
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
}

#[derive(Debug, Default)]
struct ServerState {
    status: Status,
    report: Option<BatchReport>,
    cancel: Option<CancellationToken>,
    /// Distinguishes the current batch from one that was replaced.
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Status {
    pub total: u64,
    pub done: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub state: RunState,
}

#[derive(Debug, Deserialize)]
pub struct TrackApiRequest {
    pub url: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Per-block sample cap; `0` is rejected. Omitted means the default.
    #[serde(default)]
    pub cap: Option<usize>,
    #[serde(default)]
    pub force_all: bool,
}

impl Status {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Hit => self.hits += 1,
            Verdict::Miss => self.misses += 1,
            Verdict::Error => self.errors += 1,
        }
    }
}

impl AppState {
    pub fn new(blocks: Vec<AddressBlock>) -> Self {
        Self {
            blocks: Arc::new(blocks),
            inner: Arc::new(RwLock::new(ServerState::default())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/track", post(post_track))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, blocks: Vec<AddressBlock>) -> Result<()> {
    let app = router(AppState::new(blocks));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving API on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(report) = s.report.as_ref() {
        (StatusCode::OK, Json(report.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(c) = s.cancel.as_ref() {
        c.cancel();
    }
    (StatusCode::ACCEPTED, Json(s.status.clone()))
}

async fn post_track(
    State(app): State<AppState>,
    Json(req): Json<TrackApiRequest>,
) -> impl IntoResponse {
    let template = match TargetTemplate::parse(&req.url, req.domain.as_deref()) {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let cap = match SampleCap::from_flags(req.cap.unwrap_or(DEFAULT_TRACK_CAP), req.force_all) {
        Ok(c) => c,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let concurrency = req.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
    if concurrency == 0 {
        return (StatusCode::BAD_REQUEST, "concurrency must be at least 1").into_response();
    }
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TRACK_TIMEOUT);

    let source = TargetSource::Blocks {
        blocks: app.blocks.as_ref().clone(),
        cap,
    };
    let total = source.addresses().len() as u64;
    if total == 0 {
        return (StatusCode::BAD_REQUEST, "no address blocks loaded").into_response();
    }
    let track_req = TrackRequest {
        template,
        source,
        concurrency,
        timeout,
    };

    let cancel = CancellationToken::new();
    let status = Status {
        total,
        state: RunState::Running,
        ..Status::default()
    };
    let generation = {
        let mut s = app.inner.write().await;
        // Replace any running batch
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.generation += 1;
        s.status = status.clone();
        s.report = None;
        s.cancel = Some(cancel.clone());
        s.generation
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();

    let app_progress = app.clone();
    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let ProgressEvent::Completed { done, verdict, .. } = ev else {
                continue;
            };
            let mut s = app_progress.inner.write().await;
            if s.generation != generation || s.status.state != RunState::Running {
                break;
            }
            s.status.done = done as u64;
            s.status.record(verdict);
        }
    });

    let app_run = app.clone();
    tokio::spawn(async move {
        let res = tracker::track(track_req, cancel, Some(tx)).await;
        let mut s = app_run.inner.write().await;
        if s.generation != generation {
            return;
        }
        s.cancel = None;
        match res {
            Ok(report) => {
                s.status = status_of(&report, s.status.total);
                s.report = Some(report);
            }
            Err(e) => {
                s.status.state = RunState::Idle;
                error!("tracking run failed: {e}");
            }
        }
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

fn status_of(report: &BatchReport, total: u64) -> Status {
    Status {
        total,
        done: report.total() as u64,
        hits: report.counts.hits,
        misses: report.counts.misses,
        errors: report.counts.errors,
        state: if report.cancelled {
            RunState::Cancelled
        } else {
            RunState::Done
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(vec!["198.51.100.0/30".parse().unwrap()]))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn idle_server_reports_status_and_no_results() {
        let res = app()
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let status: Status = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status, Status::default());

        let res = app()
            .oneshot(Request::get("/api/results").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn track_rejects_bad_input() {
        let res = app()
            .oneshot(post_json("/api/track", r#"{"url":"ftp://example.com/a.png"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app()
            .oneshot(post_json("/api/track", r#"{"url":"https://example.com/a.png","cap":0}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app()
            .oneshot(post_json(
                "/api/track",
                r#"{"url":"https://example.com/a.png","concurrency":0}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
