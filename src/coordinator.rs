use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cluster::{DispatchOrchestrator, Hub, LivenessSweep, MembershipRegistry};
use crate::config::CoordinatorConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::Result;
use crate::scheduler::{JobStore, MemoryJobStore, TriggerEngine};
use crate::worker::HttpExecutor;

/// Coordinator process: registry, hub, dispatch, triggers and the HTTP
/// listener carrying both the dashboard and the `/hub` endpoint.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<MembershipRegistry>,
    hub: Arc<Hub>,
    orchestrator: Arc<DispatchOrchestrator>,
}

impl Coordinator {
    /// Build from config, seeding the store from the jobs file if one is set.
    pub async fn new(config: CoordinatorConfig) -> Result<Self> {
        let store: Arc<dyn JobStore> = match &config.jobs_file {
            Some(path) => Arc::new(MemoryJobStore::from_file(path).await?),
            None => Arc::new(MemoryJobStore::new()),
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: CoordinatorConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(MembershipRegistry::new(&config.registry));
        let hub = Arc::new(Hub::new(registry.clone(), store.clone()));
        let executor = HttpExecutor::new(config.executor.clone())?;
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            store,
            registry.clone(),
            hub.clone(),
            executor,
            config.dispatch.clone(),
        ));

        Ok(Self {
            config,
            registry,
            hub,
            orchestrator,
        })
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn orchestrator(&self) -> &Arc<DispatchOrchestrator> {
        &self.orchestrator
    }

    /// Bind the configured address and run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, cancel).await
    }

    /// Run on an already bound listener.
    ///
    /// Spawns the liveness sweep and one trigger timer per job, then serves
    /// HTTP until shutdown.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            listen_addr = ?listener.local_addr().ok(),
            clustering_enabled = self.config.dispatch.clustering_enabled,
            liveness_window_secs = self.config.registry.liveness_window.as_secs(),
            stale_threshold_secs = self.config.registry.stale_threshold.as_secs(),
            "Starting coordinator"
        );

        let sweep = LivenessSweep::new(self.hub.clone(), &self.config.registry);
        let sweep_cancel = cancel.clone();
        let sweep_handle = tokio::spawn(async move {
            sweep.run(sweep_cancel).await;
        });

        let triggers = TriggerEngine::new(self.orchestrator.clone())
            .start(&cancel)
            .await?;

        let state = DashboardState {
            registry: self.registry.clone(),
            orchestrator: self.orchestrator.clone(),
            hub: self.hub.clone(),
            cancel: cancel.clone(),
        };
        let served = run_dashboard(listener, state, cancel.clone()).await;

        // Timers stop before the shared state they touch is dropped.
        cancel.cancel();
        for handle in triggers {
            let _ = handle.await;
        }
        let _ = sweep_handle.await;

        tracing::info!("Coordinator stopped");
        served
    }
}
