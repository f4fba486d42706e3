//! End-to-end dispatch through workers attached over the in-process transport.
//!
//! Verifies that:
//! - A dispatched job runs on a worker and its outcome is recorded with the worker id
//! - A worker never runs more calls at once than it has slots
//! - Completions give booked slots back on the coordinator
//! - Auto jobs fall back to local execution when no worker is attached

mod test_harness;

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use cronfleet::cluster::FireResult;
use cronfleet::scheduler::{ExecutionPreference, Job, JobStore};
use test_harness::{spawn_target, wait_until, TestCluster};

#[tokio::test]
async fn test_distributed_job_runs_on_worker() {
    let target = spawn_target().await;
    let job = Job::new(1, "ping", "GET", target.url("/ok")).with_execution(ExecutionPreference::Distributed);
    let cluster = TestCluster::new(vec![job]);
    let worker_id = cluster.add_worker("alpha", 4).await;

    let result = cluster.orchestrator.fire(1, Utc::now(), &cluster.cancel).await;
    assert_eq!(
        result,
        FireResult::Dispatched {
            worker_id: worker_id.clone(),
            attempts: 1
        }
    );

    assert!(
        wait_until(Duration::from_secs(5), || async { cluster.history_len(1).await == 1 }).await,
        "completion was never recorded"
    );

    let history = cluster.store.executions(1).await.unwrap();
    assert!(history[0].success);
    assert_eq!(history[0].status_code, Some(200));
    assert_eq!(history[0].worker_id.as_deref(), Some(worker_id.as_str()));
    assert_eq!(target.hits(), 1);

    // The booked slot comes back once the completion is processed.
    assert!(
        wait_until(Duration::from_secs(2), || async {
            cluster
                .registry
                .get(&worker_id)
                .await
                .map(|w| w.capacity.current_running == 0)
                .unwrap_or(false)
        })
        .await
    );
}

#[tokio::test]
async fn test_auto_job_prefers_connected_worker() {
    let target = spawn_target().await;
    let job = Job::new(1, "ping", "GET", target.url("/ok"));
    let cluster = TestCluster::new(vec![job]);

    let local = cluster.orchestrator.fire(1, Utc::now(), &cluster.cancel).await;
    assert_eq!(local, FireResult::Executed { success: true });
    let history = cluster.store.executions(1).await.unwrap();
    assert!(history[0].worker_id.is_none());

    cluster.add_worker("alpha", 2).await;
    let remote = cluster.orchestrator.fire(1, Utc::now(), &cluster.cancel).await;
    assert!(matches!(remote, FireResult::Dispatched { .. }));

    assert!(wait_until(Duration::from_secs(5), || async { cluster.history_len(1).await == 2 }).await);
    let history = cluster.store.executions(1).await.unwrap();
    assert!(history[1].worker_id.is_some());
}

#[tokio::test]
async fn test_pool_never_exceeds_its_slots() {
    let target = spawn_target().await;
    let jobs: Vec<Job> = (1..=8)
        .map(|id| Job::new(id, format!("slow-{id}"), "GET", target.url("/slow")))
        .collect();
    let cluster = TestCluster::new(jobs);
    let worker_id = cluster.add_worker("narrow", 2).await;

    // Send straight to the worker so the coordinator's slot booking does
    // not throttle the test: the worker's own pool has to hold the line.
    for id in 1..=8 {
        let job = cluster.store.find_by_id(id).await.unwrap().unwrap();
        let command = cronfleet::protocol::DispatchCommand::from_job(&job, Utc::now(), 0, Duration::from_secs(30));
        use cronfleet::cluster::WorkerChannel;
        cluster.hub.send_command(&worker_id, command).await.unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(10), || async {
            cluster.store.execution_count().await == 8
        })
        .await,
        "not every job completed"
    );
    assert_eq!(target.hits(), 8);
    assert!(target.max_in_flight() <= 2, "saw {} concurrent calls", target.max_in_flight());
    assert_eq!(target.max_in_flight(), 2);
}

#[tokio::test]
async fn test_selection_spreads_load_across_workers() {
    let target = spawn_target().await;
    let jobs: Vec<Job> = (1..=4)
        .map(|id| {
            Job::new(id, format!("slow-{id}"), "GET", target.url("/slow"))
                .with_execution(ExecutionPreference::Distributed)
        })
        .collect();
    let cluster = TestCluster::new(jobs);
    let a = cluster.add_worker("a", 2).await;
    let b = cluster.add_worker("b", 2).await;

    let cancel = CancellationToken::new();
    let mut chosen = Vec::new();
    for id in 1..=4 {
        match cluster.orchestrator.fire(id, Utc::now(), &cancel).await {
            FireResult::Dispatched { worker_id, .. } => chosen.push(worker_id),
            other => panic!("job {id} not dispatched: {other:?}"),
        }
    }

    assert_eq!(chosen.iter().filter(|w| **w == a).count(), 2);
    assert_eq!(chosen.iter().filter(|w| **w == b).count(), 2);
    assert!(wait_until(Duration::from_secs(5), || async { cluster.store.execution_count().await == 4 }).await);
}

#[tokio::test]
async fn test_worker_disconnect_removes_record() {
    let cluster = TestCluster::new(vec![]);
    let worker_id = cluster.add_worker("short-lived", 1).await;
    assert!(cluster.registry.get(&worker_id).await.is_some());

    cluster.hub.disconnect(&worker_id).await;

    assert!(cluster.registry.get(&worker_id).await.is_none());
    assert!(cluster.registry.list_available().await.is_empty());
}
