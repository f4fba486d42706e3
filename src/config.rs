use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FleetError, Result};

/// Timeouts and retry policy for the coordinator's dispatch path.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Bound on loading a job definition from the store.
    pub fetch_timeout: Duration,
    /// Bound on one call into the worker selector.
    pub selection_timeout: Duration,
    /// Bound on handing a command to a worker connection.
    pub send_timeout: Duration,
    /// Retries after the first attempt, so at most `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Base of the exponential backoff between attempts.
    pub retry_delay: Duration,
    /// Per-attempt HTTP timeout stamped on every command.
    pub default_job_timeout: Duration,
    /// When false, `Auto` jobs always run on the coordinator.
    pub clustering_enabled: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
            selection_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            default_job_timeout: Duration::from_secs(30),
            clustering_enabled: true,
        }
    }
}

/// Liveness parameters for the membership registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum heartbeat age for a worker to be selectable.
    pub liveness_window: Duration,
    /// Heartbeat age at which a worker is evicted entirely.
    pub stale_threshold: Duration,
    /// Period of the eviction sweep and `HeartbeatCheck` broadcast.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(2 * 60),
            stale_threshold: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Retry policy for outbound HTTP calls.
///
/// The retry counter here is independent of [`DispatchConfig::max_retries`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Used when a command arrives without a timeout.
    pub default_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub instance_name: String,
    /// WebSocket URL of the coordinator hub, e.g. `ws://127.0.0.1:8080/hub`.
    pub coordinator_url: String,
    pub host: String,
    pub ip_address: String,
    pub port: u16,
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub version: String,
    pub executor: ExecutorConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            instance_name: "worker".to_string(),
            coordinator_url: "ws://127.0.0.1:8080/hub".to_string(),
            host: "localhost".to_string(),
            ip_address: "127.0.0.1".to_string(),
            port: 5001,
            max_concurrent_jobs: 10,
            queue_capacity: 1000,
            heartbeat_interval: Duration::from_secs(30),
            version: env!("CARGO_PKG_VERSION").to_string(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(instance_name: impl Into<String>, coordinator_url: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            coordinator_url: coordinator_url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(FleetError::InvalidConfig(
                "max concurrent jobs must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(FleetError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(FleetError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// JSON array of job definitions used to seed the in-memory store.
    pub jobs_file: Option<PathBuf>,
    pub dispatch: DispatchConfig,
    pub registry: RegistryConfig,
    pub executor: ExecutorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            jobs_file: None,
            dispatch: DispatchConfig::default(),
            registry: RegistryConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_jobs_file(mut self, path: PathBuf) -> Self {
        self.jobs_file = Some(path);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.liveness_window > self.registry.stale_threshold {
            return Err(FleetError::InvalidConfig(
                "liveness window must not exceed the staleness threshold".to_string(),
            ));
        }
        if self.registry.sweep_interval.is_zero() {
            return Err(FleetError::InvalidConfig(
                "sweep interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_config_default() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.fetch_timeout, Duration::from_secs(5));
        assert_eq!(cfg.selection_timeout, Duration::from_secs(5));
        assert_eq!(cfg.send_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay, Duration::from_secs(2));
        assert_eq!(cfg.default_job_timeout, Duration::from_secs(30));
        assert!(cfg.clustering_enabled);
    }

    #[test]
    fn registry_config_default() {
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.liveness_window, Duration::from_secs(120));
        assert_eq!(cfg.stale_threshold, Duration::from_secs(300));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.max_concurrent_jobs, 10);
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.executor.max_retries, 3);
        assert_eq!(cfg.executor.default_timeout, Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn worker_config_builders() {
        let cfg = WorkerConfig::new("w-1", "ws://coord:9000/hub")
            .with_max_concurrent_jobs(4)
            .with_queue_capacity(16);
        assert_eq!(cfg.instance_name, "w-1");
        assert_eq!(cfg.coordinator_url, "ws://coord:9000/hub");
        assert_eq!(cfg.max_concurrent_jobs, 4);
        assert_eq!(cfg.queue_capacity, 16);
    }

    #[test]
    fn worker_config_rejects_zero_slots() {
        let cfg = WorkerConfig::default().with_max_concurrent_jobs(0);
        assert!(matches!(cfg.validate(), Err(FleetError::InvalidConfig(_))));

        let cfg = WorkerConfig::default().with_queue_capacity(0);
        assert!(matches!(cfg.validate(), Err(FleetError::InvalidConfig(_))));
    }

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert!(cfg.jobs_file.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn coordinator_config_rejects_inverted_windows() {
        let mut cfg = CoordinatorConfig::default();
        cfg.registry.liveness_window = Duration::from_secs(600);
        assert!(cfg.validate().is_err());
    }
}
