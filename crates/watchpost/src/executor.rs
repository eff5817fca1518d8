use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentClient, ExecuteRequest};
use crate::database::Store;
use crate::database::models::{CheckEvent, Monitor, MonitoringMode};
use crate::monitoring::aggregate::aggregate_results;
use crate::monitoring::types::{CheckResult, CheckStatus};
use crate::monitoring::{perform_check, validation};
use crate::scheduler::CheckJob;
use crate::status;

/// Worker pool that drains the job queue and runs checks.
///
/// Jobs run on spawned tasks bounded by a semaphore, so one slow check
/// holds one permit rather than the whole queue. A job whose schedule was
/// cancelled after enqueue is dropped without running.
pub struct Executor {
    store: Arc<dyn Store>,
    agent: AgentClient,
    concurrency: Arc<Semaphore>,
    body_capture_limit: usize,
}

impl Executor {
    pub fn new(
        store: Arc<dyn Store>,
        agent: AgentClient,
        worker_concurrency: usize,
        body_capture_limit: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            agent,
            concurrency: Arc::new(Semaphore::new(worker_concurrency.max(1))),
            body_capture_limit,
        })
    }

    /// Drain the job queue until it closes.
    pub async fn run(self: Arc<Self>, mut job_rx: mpsc::Receiver<CheckJob>) {
        info!(permits = self.concurrency.available_permits(), "Check executor started");

        while let Some(job) = job_rx.recv().await {
            if job.is_cancelled() {
                debug!(monitor_id = job.monitor_id, "Dropping cancelled job");
                continue;
            }

            let Ok(permit) = Arc::clone(&self.concurrency).acquire_owned().await else {
                break;
            };

            let executor = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                executor.process_check(job).await;
            });
        }

        info!("Check executor stopped");
    }

    /// Run one check job end to end.
    ///
    /// Failures inside check processing never escape: they are recorded as
    /// an `internal_error` check event and folded into the monitor status,
    /// so a bug in one check cannot take the worker down.
    pub async fn process_check(&self, job: CheckJob) {
        let monitor_id = job.monitor_id;

        if let Err(e) = self.try_process(&job).await {
            error!(monitor_id, error = %e, "Check processing failed");
            self.record_internal_error(monitor_id, &e).await;
        }
    }

    async fn try_process(&self, job: &CheckJob) -> Result<()> {
        let monitor_id = job.monitor_id;

        let Some(monitor) = self
            .store
            .get_monitor(monitor_id)
            .await
            .context("failed to load monitor")?
        else {
            // Deleted between enqueue and execution; the stale schedule is
            // the scheduler's problem, this job is just a no-op.
            debug!(monitor_id, "Monitor no longer exists, skipping check");
            return Ok(());
        };

        if !monitor.enabled {
            debug!(monitor_id, "Monitor disabled, skipping check");
            return Ok(());
        }

        // Only non-local regions go down the fan-out path; a global monitor
        // whose selection is empty or just "local" degrades to a local probe.
        let remote_regions: Vec<String> =
            monitor.regions.iter().filter(|code| *code != "local").cloned().collect();
        let results = match monitor.monitoring_mode {
            MonitoringMode::Global if !remote_regions.is_empty() => {
                let Some(results) = self.run_global(&monitor, &remote_regions).await? else {
                    return Ok(());
                };
                results
            }
            _ => vec![self.run_local(&monitor).await],
        };

        for result in &results {
            let event = CheckEvent::from_result(monitor_id, &monitor, result);
            self.store
                .insert_check_event(&event)
                .await
                .context("failed to persist check event")?;
        }

        let (effective, mean_response_time_ms) = if results.len() > 1 {
            aggregate_results(&results)
        } else {
            (results[0].status, results[0].response_time_ms)
        };

        debug!(
            monitor_id,
            status = %effective,
            response_time_ms = mean_response_time_ms,
            regions = results.len(),
            "Check completed"
        );

        self.advance_status(monitor_id, effective).await
    }

    /// Probe directly from this process.
    async fn run_local(&self, monitor: &Monitor) -> CheckResult {
        let output = perform_check(&monitor.config, "local", self.body_capture_limit).await;
        let mut result = output.result;
        validation::apply(&mut result, &monitor.validation_rules, output.body.as_deref());
        result
    }

    /// Fan the probe out to every healthy selected region concurrently.
    ///
    /// Returns None when no healthy region is available; the check is
    /// skipped entirely rather than recorded as a failure the target did
    /// not cause.
    async fn run_global(
        &self,
        monitor: &Monitor,
        selected: &[String],
    ) -> Result<Option<Vec<CheckResult>>> {
        let monitor_id = monitor.id.unwrap_or_default();

        let regions = self
            .store
            .get_regions_by_codes(selected)
            .await
            .context("failed to resolve monitor regions")?;

        let healthy: Vec<_> = regions.into_iter().filter(|r| r.enabled && r.healthy).collect();
        if healthy.is_empty() {
            warn!(monitor_id, ?selected, "No healthy region available, skipping check");
            return Ok(None);
        }

        let request = ExecuteRequest {
            job_id: Uuid::new_v4().to_string(),
            monitor_id,
            monitor_type: monitor.monitor_type(),
            config: monitor.config.clone(),
            validation_rules: monitor.validation_rules.clone(),
        };

        // Validation runs on the agent for global checks; the results come
        // back already demoted where rules failed.
        let calls = healthy
            .iter()
            .map(|region| self.agent.execute(&region.code, &region.endpoint_url, &request));

        Ok(Some(join_all(calls).await))
    }

    async fn advance_status(&self, monitor_id: i64, effective: CheckStatus) -> Result<()> {
        let previous = self
            .store
            .get_monitor_status(monitor_id)
            .await
            .context("failed to load monitor status")?;

        let row = status::advance(monitor_id, previous.as_ref(), effective, Utc::now());
        self.store
            .upsert_monitor_status(&row)
            .await
            .context("failed to update monitor status")?;

        Ok(())
    }

    /// Best-effort record of a processing failure; persistence problems at
    /// this point are logged and swallowed.
    async fn record_internal_error(&self, monitor_id: i64, cause: &anyhow::Error) {
        let event = CheckEvent::internal_error(monitor_id, format!("{cause:#}"));
        if let Err(e) = self.store.insert_check_event(&event).await {
            error!(monitor_id, error = %e, "Failed to persist internal error event");
        }

        if let Err(e) = self.advance_status(monitor_id, CheckStatus::Failure).await {
            error!(monitor_id, error = %e, "Failed to update status after internal error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ExecuteResponse;
    use crate::database::initialize_database;
    use crate::database::models::{MonitorState, Region};
    use crate::database::repository::LibsqlStore;
    use crate::monitoring::checker::{ProbeConfig, TcpConfig};
    use crate::monitoring::types::ErrorKind;
    use crate::pool::LibsqlManager;
    use anyhow::Result;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tempfile::tempdir;

    async fn create_test_store() -> Result<(Arc<LibsqlStore>, tempfile::TempDir)> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");

        let db = libsql::Builder::new_local(db_path.to_string_lossy().as_ref()).build().await?;
        let manager = LibsqlManager::new(db);
        let pool: crate::pool::LibsqlPool = deadpool::managed::Pool::builder(manager)
            .config(deadpool::managed::PoolConfig::default())
            .build()?;

        let conn = pool.get().await?;
        initialize_database(&conn).await?;

        Ok((Arc::new(LibsqlStore::new_from_pool(pool)), temp_dir))
    }

    fn test_executor(store: Arc<LibsqlStore>) -> Arc<Executor> {
        let agent = AgentClient::new(std::time::Duration::from_secs(5)).unwrap();
        Executor::new(store, agent, 4, 64 * 1024)
    }

    fn tcp_monitor(host: &str, port: u16) -> Monitor {
        Monitor::new(
            1,
            "tcp target".to_string(),
            ProbeConfig::Tcp(TcpConfig { host: host.to_string(), port, timeout_ms: 2000 }),
        )
    }

    /// Minimal HTTP/1.1 server that answers every request with a fixed
    /// status and JSON body. Stands in for a regional agent.
    async fn spawn_fake_agent(status_line: &'static str, body: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    // Drain the request before answering so the client's
                    // write side never sees a reset.
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        match socket.read(&mut chunk).await {
                            Ok(0) => break,
                            Ok(n) => {
                                buf.extend_from_slice(&chunk[..n]);
                                if request_complete(&buf) {
                                    break;
                                }
                            }
                            Err(_) => return,
                        }
                    }

                    let response = format!(
                        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{addr}")
    }

    fn request_complete(buf: &[u8]) -> bool {
        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        buf.len() >= header_end + 4 + content_length
    }

    async fn save_region(store: &LibsqlStore, code: &str, endpoint_url: &str, healthy: bool) {
        store
            .save_region(&Region {
                code: code.to_string(),
                display_name: code.to_uppercase(),
                endpoint_url: endpoint_url.to_string(),
                enabled: true,
                healthy,
                last_health_check_at: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn local_check_records_event_and_up_status() -> Result<()> {
        let (store, _dir) = create_test_store().await?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let id = store.save_monitor(&tcp_monitor(&addr.ip().to_string(), addr.port())).await?;
        let executor = test_executor(Arc::clone(&store));

        executor.process_check(CheckJob::for_tests(id)).await;

        let events = store.get_check_events(id, 10).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, CheckStatus::Success);
        assert_eq!(events[0].region, "local");

        let row = store.get_monitor_status(id).await?.expect("status row");
        assert_eq!(row.state, MonitorState::Up);
        assert_eq!(row.consecutive_successes, 1);
        assert_eq!(row.consecutive_failures, 0);
        Ok(())
    }

    #[tokio::test]
    async fn repeated_failures_extend_the_down_run() -> Result<()> {
        let (store, _dir) = create_test_store().await?;

        // Bind and drop to get a refusing port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let id = store.save_monitor(&tcp_monitor(&addr.ip().to_string(), addr.port())).await?;
        let executor = test_executor(Arc::clone(&store));

        for _ in 0..5 {
            executor.process_check(CheckJob::for_tests(id)).await;
        }

        let row = store.get_monitor_status(id).await?.expect("status row");
        assert_eq!(row.state, MonitorState::Down);
        assert_eq!(row.consecutive_failures, 5);
        assert_eq!(row.consecutive_successes, 0);
        assert_eq!(store.get_check_events(id, 10).await?.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn missing_monitor_is_a_no_op() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let executor = test_executor(Arc::clone(&store));

        executor.process_check(CheckJob::for_tests(999)).await;

        assert!(store.get_check_events(999, 10).await?.is_empty());
        assert!(store.get_monitor_status(999).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn global_check_records_one_event_per_region() -> Result<()> {
        let (store, _dir) = create_test_store().await?;

        let success_body = |region: &str| {
            serde_json::to_string(&ExecuteResponse {
                job_id: "ignored".to_string(),
                region: region.to_string(),
                status: CheckStatus::Success,
                response_time_ms: 40,
                status_code: Some(200),
                headers: None,
                timing: None,
                error: None,
                validation_errors: None,
                body_size_bytes: None,
            })
            .unwrap()
        };

        let east = spawn_fake_agent("200 OK", success_body("us-east")).await;
        let west = spawn_fake_agent("200 OK", success_body("eu-west")).await;
        save_region(&store, "us-east", &east, true).await;
        save_region(&store, "eu-west", &west, true).await;

        let mut monitor = tcp_monitor("db.internal", 5432);
        monitor.monitoring_mode = MonitoringMode::Global;
        monitor.regions = vec!["us-east".to_string(), "eu-west".to_string()];
        let id = store.save_monitor(&monitor).await?;

        let executor = test_executor(Arc::clone(&store));
        executor.process_check(CheckJob::for_tests(id)).await;

        let events = store.get_check_events(id, 10).await?;
        assert_eq!(events.len(), 2);
        let mut regions: Vec<_> = events.iter().map(|e| e.region.clone()).collect();
        regions.sort();
        assert_eq!(regions, vec!["eu-west", "us-east"]);

        let row = store.get_monitor_status(id).await?.expect("status row");
        assert_eq!(row.state, MonitorState::Up);
        assert_eq!(row.consecutive_successes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn agent_error_status_becomes_agent_error_failure() -> Result<()> {
        let (store, _dir) = create_test_store().await?;

        let broken = spawn_fake_agent("500 Internal Server Error", "{}".to_string()).await;
        save_region(&store, "us-east", &broken, true).await;

        let mut monitor = tcp_monitor("db.internal", 5432);
        monitor.monitoring_mode = MonitoringMode::Global;
        monitor.regions = vec!["us-east".to_string()];
        let id = store.save_monitor(&monitor).await?;

        let executor = test_executor(Arc::clone(&store));
        executor.process_check(CheckJob::for_tests(id)).await;

        let events = store.get_check_events(id, 10).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, CheckStatus::Failure);
        assert_eq!(events[0].error_kind, Some(ErrorKind::AgentError));

        let row = store.get_monitor_status(id).await?.expect("status row");
        assert_eq!(row.state, MonitorState::Down);
        Ok(())
    }

    #[tokio::test]
    async fn global_monitor_with_only_local_region_probes_locally() -> Result<()> {
        let (store, _dir) = create_test_store().await?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let mut monitor = tcp_monitor(&addr.ip().to_string(), addr.port());
        monitor.monitoring_mode = MonitoringMode::Global;
        monitor.regions = vec!["local".to_string()];
        let id = store.save_monitor(&monitor).await?;

        let executor = test_executor(Arc::clone(&store));
        executor.process_check(CheckJob::for_tests(id)).await;

        let events = store.get_check_events(id, 10).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].region, "local");
        assert_eq!(events[0].status, CheckStatus::Success);

        let row = store.get_monitor_status(id).await?.expect("status row");
        assert_eq!(row.state, MonitorState::Up);
        Ok(())
    }

    #[tokio::test]
    async fn no_healthy_region_skips_the_check_entirely() -> Result<()> {
        let (store, _dir) = create_test_store().await?;

        save_region(&store, "us-east", "http://127.0.0.1:1", false).await;

        let mut monitor = tcp_monitor("db.internal", 5432);
        monitor.monitoring_mode = MonitoringMode::Global;
        monitor.regions = vec!["us-east".to_string()];
        let id = store.save_monitor(&monitor).await?;

        let executor = test_executor(Arc::clone(&store));
        executor.process_check(CheckJob::for_tests(id)).await;

        assert!(store.get_check_events(id, 10).await?.is_empty());
        assert!(store.get_monitor_status(id).await?.is_none());
        Ok(())
    }
}
