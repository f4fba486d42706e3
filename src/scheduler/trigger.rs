use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::sleep_or_cancel;
use crate::cluster::DispatchOrchestrator;
use crate::error::Result;
use crate::scheduler::job::{Job, JobId, Schedule};

/// Cron trigger engine.
///
/// Every job known at start gets its own timer task. Each fire spawns an
/// independent fire event, so a slow dispatch never delays the next one.
pub struct TriggerEngine {
    orchestrator: Arc<DispatchOrchestrator>,
}

/// Maps wall-clock fire times onto the tokio clock.
///
/// Anchored once at start; sleeps are measured on the tokio clock so fire
/// times stay consistent with timers elsewhere in the process.
#[derive(Debug, Clone, Copy)]
struct Clock {
    wall: DateTime<Utc>,
    instant: Instant,
}

impl Clock {
    fn anchor() -> Self {
        Self {
            wall: Utc::now(),
            instant: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.instant.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }

    fn deadline(&self, at: DateTime<Utc>) -> Instant {
        let offset = (at - self.wall).to_std().unwrap_or_default();
        self.instant + offset
    }
}

impl TriggerEngine {
    pub fn new(orchestrator: Arc<DispatchOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn start(&self, cancel: &CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        let jobs: Vec<Job> = self.orchestrator.store().list_jobs().await?;
        tracing::info!(jobs = jobs.len(), "Starting trigger engine");
        let clock = Clock::anchor();
        Ok(jobs
            .iter()
            .map(|job| self.schedule(job.id, job.schedule.clone(), clock, cancel.clone()))
            .collect())
    }

    fn schedule(&self, job_id: JobId, schedule: Schedule, clock: Clock, cancel: CancellationToken) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();

        tokio::spawn(async move {
            let mut cursor = clock.now();
            // Fires missed while a previous sleep overran are skipped, not replayed.
            while let Some(next) = schedule.next_after(&cursor) {
                let delay = clock.deadline(next).saturating_duration_since(Instant::now());
                tracing::debug!(job_id, %next, delay_ms = delay.as_millis() as u64, "Next fire scheduled");
                if !sleep_or_cancel(delay, &cancel).await {
                    break;
                }

                let orchestrator = orchestrator.clone();
                let fire_cancel = cancel.clone();
                tokio::spawn(async move {
                    orchestrator.fire(job_id, next, &fire_cancel).await;
                });
                cursor = next.max(clock.now());
            }
            tracing::debug!(job_id, schedule = %schedule, "Trigger timer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::cluster::{Hub, MembershipRegistry};
    use crate::config::{DispatchConfig, ExecutorConfig, RegistryConfig};
    use crate::scheduler::{ExecutionPreference, JobStatus, JobStore, MemoryJobStore};
    use crate::worker::HttpExecutor;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_tokio_time() {
        let clock = Clock::anchor();
        tokio::time::sleep(Duration::from_secs(90)).await;

        assert_eq!(clock.now() - clock.wall, chrono::Duration::seconds(90));
        let at = clock.wall + chrono::Duration::seconds(30);
        assert_eq!(clock.deadline(at), clock.instant + Duration::from_secs(30));
        // Times already past map to the anchor, never before it.
        assert_eq!(clock.deadline(clock.wall - chrono::Duration::seconds(5)), clock.instant);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_schedule_and_skips_paused_jobs() {
        // Once per second: whatever the sub-second offset at start, exactly
        // ten boundaries fall inside the next ten seconds.
        let every_second = Schedule::parse("* * * * * *").unwrap();
        let active = Job::new(1, "active", "GET", "https://ok.example/")
            .with_execution(ExecutionPreference::Distributed)
            .with_schedule(every_second.clone());
        let paused = Job::new(2, "paused", "GET", "https://ok.example/")
            .with_execution(ExecutionPreference::Distributed)
            .with_status(JobStatus::Paused)
            .with_schedule(every_second);

        let store = Arc::new(MemoryJobStore::with_jobs([active, paused]));
        let registry = Arc::new(MembershipRegistry::new(&RegistryConfig::default()));
        let hub = Arc::new(Hub::new(registry.clone(), store.clone()));
        let config = DispatchConfig {
            max_retries: 0,
            ..Default::default()
        };
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            store.clone(),
            registry,
            hub,
            HttpExecutor::new(ExecutorConfig::default()).unwrap(),
            config,
        ));

        let cancel = CancellationToken::new();
        let handles = TriggerEngine::new(orchestrator).start(&cancel).await.unwrap();
        assert_eq!(handles.len(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        let history = store.executions(1).await.unwrap();
        assert_eq!(history.len(), 10);
        // Outcomes carry the scheduled fire time, on whole seconds.
        assert!(history.iter().all(|o| o.fired_at.timestamp_subsec_nanos() == 0));
        assert!(store.executions(2).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_fires_before_the_first_boundary() {
        // Sleep to one second short of the next top of the hour, then past it.
        let hourly = Schedule::parse("0 0 * * * *").unwrap();
        let job = Job::new(1, "hourly", "GET", "https://ok.example/")
            .with_execution(ExecutionPreference::Distributed)
            .with_schedule(hourly.clone());

        let store = Arc::new(MemoryJobStore::with_jobs([job]));
        let registry = Arc::new(MembershipRegistry::new(&RegistryConfig::default()));
        let hub = Arc::new(Hub::new(registry.clone(), store.clone()));
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            store.clone(),
            registry,
            hub,
            HttpExecutor::new(ExecutorConfig::default()).unwrap(),
            DispatchConfig {
                max_retries: 0,
                ..Default::default()
            },
        ));

        let cancel = CancellationToken::new();
        let start = Utc::now();
        let handles = TriggerEngine::new(orchestrator).start(&cancel).await.unwrap();

        let first = hourly.next_after(&start).unwrap();
        let until_first = (first - start).to_std().unwrap();
        tokio::time::sleep(until_first.saturating_sub(Duration::from_secs(1))).await;
        assert!(store.executions(1).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let history = store.executions(1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].fired_at, first);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
