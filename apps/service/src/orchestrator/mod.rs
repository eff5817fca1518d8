//! Orchestrator module - wires the scheduling core together
//!
//! Owns component lifecycle: database initialization, the scheduler, the
//! executor worker pool, and the periodic reconciliation that keeps the
//! schedule registry in step with the monitors table.


use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use watchpost::agent::AgentClient;
use watchpost::database::{LibsqlStore, Store, initialize_database};
use watchpost::pool::LibsqlPool;
use watchpost::scheduler::CheckJob;
use watchpost::{Executor, InflightGuard, Scheduler};

use crate::config::Config;

/// How often the schedule registry is reconciled against the database.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Main orchestrator for the watchpost service
pub struct Orchestrator {
    store: Arc<dyn Store>,
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    job_rx: Option<mpsc::Receiver<CheckJob>>,
}

impl Orchestrator {
    /// Create and start a new orchestrator
    /// This is a convenience method that creates and immediately runs the orchestrator
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let mut orchestrator = Self::new(&config, pool).await?;
        orchestrator.run().await
    }

    /// Create a new orchestrator instance
    async fn new(config: &Config, pool: LibsqlPool) -> Result<Self> {
        let conn = pool.get().await?;

        info!("Initializing database schema...");
        initialize_database(&conn).await?;

        let store: Arc<dyn Store> = Arc::new(LibsqlStore::new_from_pool(pool));

        let agent = AgentClient::new(Duration::from_secs(config.monitoring.agent_timeout_seconds))
            .context("failed to build agent client")?;

        let (job_tx, job_rx) = mpsc::channel(config.monitoring.queue_depth.max(1));
        let scheduler = Arc::new(Scheduler::new(
            job_tx,
            InflightGuard::new(),
            config.monitoring.min_interval_seconds,
        ));

        let executor = Executor::new(
            Arc::clone(&store),
            agent,
            config.monitoring.worker_concurrency,
            config.monitoring.body_capture_limit_bytes,
        );

        Ok(Self { store, scheduler, executor, job_rx: Some(job_rx) })
    }

    /// Handle for components that mutate schedules directly, such as the
    /// configuration API applying a monitor change without waiting for the
    /// next reconcile pass.
    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Run the orchestrator
    async fn run(&mut self) -> Result<()> {
        info!("Starting watchpost orchestrator...");

        // Start from a clean registry; schedules are rebuilt from the
        // database, never trusted across restarts.
        self.scheduler.clear();
        let scheduled = self.reconcile_schedules().await?;
        info!("Scheduled {} enabled monitors", scheduled);

        let job_rx = self.job_rx.take().context("orchestrator already running")?;
        let executor_handle = tokio::spawn(Arc::clone(&self.executor).run(job_rx));

        let mut reconcile = tokio::time::interval(RECONCILE_INTERVAL);
        reconcile.tick().await;

        info!("Orchestrator started successfully - processing checks");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping orchestrator");
                    self.scheduler.clear();
                    executor_handle.abort();
                    return Ok(());
                }

                _ = reconcile.tick() => {
                    match self.reconcile_schedules().await {
                        Ok(count) => debug!(scheduled = count, "Reconciled monitor schedules"),
                        Err(e) => warn!(error = %e, "Failed to reconcile monitor schedules"),
                    }
                }
            }
        }
    }

    /// Bring the schedule registry in line with the monitors table.
    ///
    /// Enabled monitors get a schedule (replaced only when the interval
    /// changed); schedules whose monitor was disabled or deleted are
    /// removed. Safe to run at any frequency because scheduling is
    /// idempotent.
    async fn reconcile_schedules(&self) -> Result<usize> {
        let monitors = self.store.get_enabled_monitors().await?;

        let mut active: HashSet<i64> = HashSet::new();
        for monitor in &monitors {
            let Some(id) = monitor.id else { continue };
            active.insert(id);

            if self.scheduler.scheduled_interval(id) == Some(monitor.interval_seconds) {
                continue;
            }
            if let Err(e) = self.scheduler.schedule_monitor(id, monitor.interval_seconds) {
                warn!(monitor_id = id, error = %e, "Skipping monitor with invalid interval");
            }
        }

        for id in self.scheduler.scheduled_ids() {
            if !active.contains(&id) {
                self.scheduler.remove_monitor_schedule(id);
            }
        }

        Ok(self.scheduler.scheduled_count())
    }
}
