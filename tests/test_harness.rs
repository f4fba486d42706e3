//! Test harness for cronfleet integration tests.
//!
//! Provides an in-process HTTP target to aim jobs at, and a coordinator with
//! workers attached over the in-process transport.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cronfleet::cluster::{DispatchOrchestrator, Hub, MembershipRegistry};
use cronfleet::config::{DispatchConfig, ExecutorConfig, RegistryConfig, WorkerConfig};
use cronfleet::scheduler::{Job, MemoryJobStore};
use cronfleet::transport::connect_local;
use cronfleet::worker::{HttpExecutor, WorkerNode};

/// Request counters shared with the target's handlers.
#[derive(Default)]
pub struct TargetStats {
    pub hits: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// A local HTTP server jobs can call.
///
/// Routes: `/ok` (200), `/fail` (500), `/echo` (POST, reflects content type
/// and body), `/slow` (200 after 200ms, tracks concurrency), `/big` (5000
/// character body), `/hang` (never answers in time), `/headers` (reflects
/// `x-trace`).
pub struct Target {
    pub addr: SocketAddr,
    pub stats: Arc<TargetStats>,
    handle: tokio::task::JoinHandle<()>,
}

impl Target {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.stats.hits.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.stats.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_target() -> Target {
    let stats = Arc::new(TargetStats::default());

    let app = Router::new()
        .route("/ok", get(ok_handler))
        .route("/fail", get(fail_handler))
        .route("/echo", post(echo_handler))
        .route("/slow", get(slow_handler))
        .route("/big", get(|| async { "x".repeat(5000) }))
        .route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "late"
            }),
        )
        .route("/headers", get(headers_handler))
        .with_state(stats.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Target { addr, stats, handle }
}

async fn ok_handler(State(stats): State<Arc<TargetStats>>) -> &'static str {
    stats.hits.fetch_add(1, Ordering::SeqCst);
    "ok"
}

async fn fail_handler(State(stats): State<Arc<TargetStats>>) -> (StatusCode, &'static str) {
    stats.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn echo_handler(
    State(stats): State<Arc<TargetStats>>,
    headers: HeaderMap,
    body: String,
) -> Json<serde_json::Value> {
    stats.hits.fetch_add(1, Ordering::SeqCst);
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    Json(json!({ "content_type": content_type, "body": body }))
}

async fn slow_handler(State(stats): State<Arc<TargetStats>>) -> &'static str {
    stats.hits.fetch_add(1, Ordering::SeqCst);
    let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    "done"
}

async fn headers_handler(headers: HeaderMap) -> String {
    headers
        .get("x-trace")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("missing")
        .to_string()
}

/// Fast retry settings so failure paths finish quickly.
pub fn quick_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        retry_delay: Duration::from_millis(10),
        ..DispatchConfig::default()
    }
}

pub fn quick_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        max_retries: 1,
        retry_delay: Duration::from_millis(10),
        ..ExecutorConfig::default()
    }
}

/// A coordinator without a network listener; workers attach in-process.
pub struct TestCluster {
    pub store: Arc<MemoryJobStore>,
    pub registry: Arc<MembershipRegistry>,
    pub hub: Arc<Hub>,
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub cancel: CancellationToken,
}

impl TestCluster {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self::with_config(jobs, quick_dispatch_config())
    }

    pub fn with_config(jobs: Vec<Job>, dispatch: DispatchConfig) -> Self {
        let store = Arc::new(MemoryJobStore::with_jobs(jobs));
        let registry = Arc::new(MembershipRegistry::new(&RegistryConfig::default()));
        let hub = Arc::new(Hub::new(registry.clone(), store.clone()));
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            store.clone(),
            registry.clone(),
            hub.clone(),
            HttpExecutor::new(quick_executor_config()).unwrap(),
            dispatch,
        ));

        Self {
            store,
            registry,
            hub,
            orchestrator,
            cancel: CancellationToken::new(),
        }
    }

    /// Start a worker with `slots` execution slots and attach it. Returns
    /// its worker id.
    pub async fn add_worker(&self, name: &str, slots: usize) -> String {
        let mut config = WorkerConfig::new(name, "local").with_max_concurrent_jobs(slots);
        config.executor = quick_executor_config();

        let (node, outbound) = WorkerNode::new(config).unwrap();
        let node = Arc::new(node);
        node.start(&self.cancel);
        let worker_id = connect_local(self.hub.clone(), node, outbound, self.cancel.clone()).await;
        // Let the startup heartbeat land so it cannot overwrite a later booking.
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker_id
    }

    pub async fn history_len(&self, job_id: u64) -> usize {
        use cronfleet::scheduler::JobStore;
        self.store.executions(job_id).await.unwrap().len()
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
