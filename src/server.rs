use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::ServerConfig;
use crate::error::{OrchestratorError, Result};
use crate::persistence::{JsonFileStore, SnapshotStore};
use crate::scheduler::Orchestrator;

/// Process that owns the orchestrator and everything driving it.
pub struct Server {
    pub config: ServerConfig,
    pub orchestrator: Arc<Orchestrator>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl Server {
    /// Build the orchestrator and restore the last snapshot, if one is configured.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when an existing snapshot cannot be read.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let store: Option<Arc<dyn SnapshotStore>> = config
            .snapshot
            .as_ref()
            .map(|snapshot| Arc::new(JsonFileStore::new(&snapshot.path)) as Arc<dyn SnapshotStore>);
        Self::with_store(config, store)
    }

    pub fn with_store(config: ServerConfig, store: Option<Arc<dyn SnapshotStore>>) -> Result<Self> {
        config.validate()?;
        let orchestrator = Arc::new(Orchestrator::new(config.orchestrator.clone())?);
        if let Some(store) = &store {
            match store.load()? {
                Some(snapshot) => orchestrator.restore(snapshot)?,
                None => tracing::info!("No snapshot found, starting empty"),
            }
        }
        Ok(Self {
            config,
            orchestrator,
            store,
        })
    }

    /// Run every subsystem until `token` is cancelled or one of them fails.
    ///
    /// 1. Dispatch loop: assigns queued jobs when woken or on each tick
    /// 2. Health loop: marks silent workers offline and reclaims their jobs
    /// 3. Snapshot loop (optional): persists state periodically
    /// 4. HTTP API (blocks until shutdown)
    ///
    /// A final snapshot is written after the API has drained.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let cfg = &self.config.orchestrator;
        tracing::info!(
            addr = %self.config.listen_addr,
            strategy = %cfg.assignment_strategy,
            fallback = %cfg.fallback_mode,
            offline_threshold_secs = cfg.offline_threshold().num_seconds(),
            "Starting orchestrator"
        );

        let dispatch = tokio::spawn(Self::dispatch_loop(
            self.orchestrator.clone(),
            token.clone(),
        ));
        let health = tokio::spawn(Self::health_loop(self.orchestrator.clone(), token.clone()));
        let snapshots: Option<JoinHandle<Result<()>>> = match (&self.store, &self.config.snapshot) {
            (Some(store), Some(snapshot)) => Some(tokio::spawn(Self::snapshot_loop(
                self.orchestrator.clone(),
                store.clone(),
                snapshot.interval(),
                token.clone(),
            ))),
            _ => None,
        };

        let state = ApiState::new(self.orchestrator.clone());
        let api_result = run_api(self.config.listen_addr, state, token.clone()).await;
        token.cancel();

        for (name, handle) in [("dispatch", dispatch), ("health", health)] {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Background task panicked");
            }
        }
        let snapshot_result = match snapshots {
            Some(handle) => handle.await.map_err(join_error)?,
            None => Ok(()),
        };

        api_result?;
        snapshot_result?;

        if let Some(store) = &self.store {
            save_snapshot(&self.orchestrator, store.clone()).await?;
            tracing::info!("Final snapshot saved");
        }
        tracing::info!("Orchestrator stopped");
        Ok(())
    }

    async fn dispatch_loop(orchestrator: Arc<Orchestrator>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(orchestrator.config().dispatch_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = orchestrator.work_available() => {}
                _ = ticker.tick() => {}
            }
            orchestrator.dispatch_pending();
        }
        tracing::debug!("Dispatch loop stopped");
    }

    async fn health_loop(orchestrator: Arc<Orchestrator>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(orchestrator.config().health_check_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = orchestrator.health_sweep();
                    if !report.reclaimed.is_empty() || !report.newly_offline.is_empty() {
                        tracing::info!(
                            offline = report.newly_offline.len(),
                            reclaimed = report.reclaimed.len(),
                            "Health sweep changed state"
                        );
                    }
                }
            }
        }
        tracing::debug!("Health loop stopped");
    }

    /// Saves periodically. A failed save stops the whole server.
    async fn snapshot_loop(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn SnapshotStore>,
        interval: std::time::Duration,
        token: CancellationToken,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; nothing has changed yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = save_snapshot(&orchestrator, store.clone()).await {
                        tracing::error!(error = %e, "Snapshot save failed, shutting down");
                        token.cancel();
                        return Err(e);
                    }
                }
            }
        }
    }
}

async fn save_snapshot(orchestrator: &Orchestrator, store: Arc<dyn SnapshotStore>) -> Result<()> {
    let snapshot = orchestrator.snapshot();
    tokio::task::spawn_blocking(move || store.save(&snapshot))
        .await
        .map_err(join_error)?
}

fn join_error(e: tokio::task::JoinError) -> OrchestratorError {
    OrchestratorError::Io(std::io::Error::other(e))
}
