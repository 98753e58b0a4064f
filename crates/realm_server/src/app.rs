//! Application wiring: builds the orchestrator from configuration and runs
//! it until a shutdown signal arrives.

use crate::config::AppConfig;
use crate::modules::{ActivitiesModule, CharacterModule, PersistenceModule};
use crate::signals::wait_for_shutdown_signal;
use anyhow::Result;
use realm_lifecycle::{ModuleOrchestrator, OrchestratorReport};
use realm_player_data::PlayerDataService;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Adds the server's modules in save order.
pub fn build_orchestrator(config: &AppConfig) -> ModuleOrchestrator {
    let mut orchestrator = ModuleOrchestrator::new();
    orchestrator
        .add_module(PersistenceModule::new(
            config.persistence.data_dir.clone(),
            config.persistence.pool_size,
            config.to_player_data_config(),
        ))
        .add_module(CharacterModule)
        .add_module(ActivitiesModule);
    orchestrator
}

pub struct Application {
    config: AppConfig,
    orchestrator: ModuleOrchestrator,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        let orchestrator = build_orchestrator(&config);
        Self { config, orchestrator }
    }

    /// Configures and starts every module, logging the outcome.
    pub async fn start(&mut self) -> Result<OrchestratorReport> {
        info!("🚀 Starting {}", self.config.server.name);
        info!(
            "📂 Player data: {} | Pool: {} | Max concurrent I/O: {}",
            self.config.persistence.data_dir.display(),
            self.config.persistence.pool_size,
            self.config.executor.max_concurrent_io
        );

        let report = self.orchestrator.start().await?;
        for module in &report.modules_failed {
            error!("❌ Module {} failed; its features are unavailable", module);
        }
        for id in report.failed.iter().chain(report.skipped.iter()) {
            warn!("Component {} is not running", id.short_name());
        }
        info!(
            "✅ {} module(s) started, {} component(s) running",
            report.modules_started.len(),
            report.initialized.len()
        );
        Ok(report)
    }

    pub fn player_data(&self) -> Option<Arc<PlayerDataService>> {
        self.orchestrator.registry()?.get::<PlayerDataService>().ok()
    }

    pub fn orchestrator(&self) -> &ModuleOrchestrator {
        &self.orchestrator
    }

    /// Lets embedders add modules of their own before [`start`](Self::start).
    pub fn orchestrator_mut(&mut self) -> &mut ModuleOrchestrator {
        &mut self.orchestrator
    }

    /// Stops every module and component.
    ///
    /// Pending player saves are never abandoned: once the configured
    /// shutdown timeout passes, a warning is logged and the stop keeps
    /// waiting for the drain to finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        let timeout = self.config.shutdown_timeout();
        let started = Instant::now();
        let stop = self.orchestrator.stop();
        tokio::pin!(stop);

        let within_timeout = tokio::time::timeout(timeout, &mut stop).await;
        let failures = match within_timeout {
            Ok(failures) => failures,
            Err(_) => {
                warn!(
                    "⏳ Shutdown still running after {:?}; waiting for pending saves to drain",
                    timeout
                );
                stop.await
            }
        };

        if failures.is_empty() {
            info!(
                "✅ {} shutdown complete in {:?}",
                self.config.server.name,
                started.elapsed()
            );
        } else {
            warn!("Shutdown finished with {} failure(s)", failures.len());
        }
        Ok(())
    }

    /// Starts the server, waits for SIGINT / SIGTERM, then shuts down.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;

        let monitor = self.player_data().map(|service| {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATS_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let stats = service.stats();
                    info!(
                        "📊 Player data - {} session(s) | {} pending save(s) | {} domain(s)",
                        stats.active_sessions, stats.pending_saves, stats.domains
                    );
                }
            })
        });

        info!("🛑 Press Ctrl+C to gracefully shutdown");
        let signal = wait_for_shutdown_signal().await?;
        info!("🛑 Received {} signal, initiating graceful shutdown...", signal);

        if let Some(monitor) = monitor {
            monitor.abort();
        }
        self.shutdown().await
    }
}
