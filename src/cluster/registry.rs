use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::config::RegistryConfig;
use crate::protocol::{CapacitySnapshot, WorkerRegistration};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A connected worker as seen by the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    /// Opaque connection id assigned by the hub.
    pub id: String,
    pub name: String,
    pub host: String,
    pub ip_address: String,
    pub port: u16,
    pub registered_at: DateTime<Utc>,
    pub capacity: CapacitySnapshot,
    pub last_heartbeat: DateTime<Utc>,
    pub version: String,
}

impl WorkerRecord {
    pub fn from_registration(id: String, registration: WorkerRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: registration.name,
            host: registration.host,
            ip_address: registration.ip_address,
            port: registration.port,
            registered_at: now,
            capacity: registration.capacity,
            last_heartbeat: now,
            version: registration.version,
        }
    }

    /// Heartbeat age at `now`. Timestamps from the future count as fresh.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_live(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        self.heartbeat_age(now) < liveness_window
    }

    pub fn is_available(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        !self.capacity.is_saturated() && self.is_live(now, liveness_window)
    }
}

/// Membership changes, published for observers such as dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Registered { worker_id: String, name: String },
    Unregistered { worker_id: String },
    Evicted { worker_id: String },
}

/// Table of known workers, their last capacity snapshot and heartbeat time.
///
/// A single mutex guards the whole table, so readers always see a complete
/// snapshot. Callers only ever receive clones.
#[derive(Debug)]
pub struct MembershipRegistry {
    workers: Mutex<HashMap<String, WorkerRecord>>,
    liveness_window: Duration,
    events: broadcast::Sender<MembershipEvent>,
}

impl MembershipRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self::with_liveness_window(config.liveness_window)
    }

    pub fn with_liveness_window(liveness_window: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            workers: Mutex::new(HashMap::new()),
            liveness_window,
            events,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: MembershipEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Add or replace a worker. Its heartbeat clock starts now.
    pub async fn register(&self, id: &str, registration: WorkerRegistration) -> WorkerRecord {
        let record = WorkerRecord::from_registration(id.to_string(), registration, Utc::now());
        self.workers
            .lock()
            .await
            .insert(record.id.clone(), record.clone());

        tracing::info!(worker_id = %record.id, name = %record.name, "Worker registered");
        self.publish(MembershipEvent::Registered {
            worker_id: record.id.clone(),
            name: record.name.clone(),
        });
        record
    }

    /// Replace the capacity snapshot and take the worker's own timestamp as
    /// its last heartbeat. Returns false for unknown workers.
    pub async fn heartbeat(&self, id: &str, capacity: CapacitySnapshot, timestamp: DateTime<Utc>) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(id) {
            Some(worker) => {
                worker.capacity = capacity;
                worker.last_heartbeat = timestamp;
                true
            }
            None => false,
        }
    }

    /// Replace the capacity snapshot; receipt time counts as a heartbeat.
    pub async fn update_status(&self, id: &str, capacity: CapacitySnapshot) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(id) {
            Some(worker) => {
                worker.capacity = capacity;
                worker.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn unregister(&self, id: &str) -> Option<WorkerRecord> {
        let removed = self.workers.lock().await.remove(id);
        if removed.is_some() {
            tracing::info!(worker_id = %id, "Worker unregistered");
            self.publish(MembershipEvent::Unregistered {
                worker_id: id.to_string(),
            });
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<WorkerRecord> {
        self.workers.lock().await.get(id).cloned()
    }

    /// All known workers, oldest registration first.
    pub async fn list_all(&self) -> Vec<WorkerRecord> {
        let mut workers: Vec<WorkerRecord> = self.workers.lock().await.values().cloned().collect();
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        workers
    }

    /// Workers that are below capacity and heartbeated within the liveness window.
    pub async fn list_available(&self) -> Vec<WorkerRecord> {
        let now = Utc::now();
        let mut workers: Vec<WorkerRecord> = self
            .workers
            .lock()
            .await
            .values()
            .filter(|w| w.is_available(now, self.liveness_window))
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Remove every worker whose heartbeat age is at least `threshold`.
    pub async fn evict_stale(&self, threshold: Duration) -> Vec<String> {
        let now = Utc::now();
        let evicted: Vec<String> = {
            let mut workers = self.workers.lock().await;
            let stale: Vec<String> = workers
                .values()
                .filter(|w| w.heartbeat_age(now) >= threshold)
                .map(|w| w.id.clone())
                .collect();
            for id in &stale {
                workers.remove(id);
            }
            stale
        };

        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), workers = ?evicted, "Evicted stale workers");
        }
        for worker_id in &evicted {
            self.publish(MembershipEvent::Evicted {
                worker_id: worker_id.clone(),
            });
        }
        evicted
    }

    /// Pick one available worker with `choose` and book a slot on it, all
    /// under one lock acquisition so concurrent callers cannot both take
    /// the last slot.
    pub(crate) async fn claim_slot<F>(&self, choose: F) -> Option<WorkerRecord>
    where
        F: FnOnce(Vec<&WorkerRecord>) -> Option<String>,
    {
        let now = Utc::now();
        let mut workers = self.workers.lock().await;
        let candidates: Vec<&WorkerRecord> = workers
            .values()
            .filter(|w| w.is_available(now, self.liveness_window))
            .collect();

        let chosen = choose(candidates)?;
        let worker = workers.get_mut(&chosen)?;
        worker.capacity.current_running += 1;
        Some(worker.clone())
    }

    /// Give back one booked slot, saturating at zero. Used when a job
    /// completes or a dispatch never reached the worker.
    pub async fn release_slot(&self, id: &str) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(id) {
            Some(worker) => {
                worker.capacity.current_running = worker.capacity.current_running.saturating_sub(1);
                true
            }
            None => false,
        }
    }
}
