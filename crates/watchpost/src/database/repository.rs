use anyhow::Result;
use async_trait::async_trait;
use libsql::params;

use super::models::{CheckEvent, Monitor, MonitorState, MonitorStatusRow, MonitoringMode, Region};
use crate::monitoring::types::{CheckStatus, ErrorKind, Timing};
use crate::pool::LibsqlPool;

/// Store trait abstracting the configuration and time-series boundaries.
///
/// Check events are append-only; monitor status is written through a
/// single upsert keyed by monitor id. The scheduler's singleton-per-monitor
/// guarantee is what makes that upsert safe without row locking.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get a monitor by id
    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>>;

    /// Get all enabled monitors
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>>;

    /// Save a monitor (insert when id is None, update otherwise)
    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64>;

    /// Delete a monitor and its status row
    async fn delete_monitor(&self, id: i64) -> Result<()>;

    /// Append one check event; never updated or deleted afterwards
    async fn insert_check_event(&self, event: &CheckEvent) -> Result<i64>;

    /// Recent check events for a monitor, newest first
    async fn get_check_events(&self, monitor_id: i64, limit: usize) -> Result<Vec<CheckEvent>>;

    /// Get the rolling status row for a monitor
    async fn get_monitor_status(&self, monitor_id: i64) -> Result<Option<MonitorStatusRow>>;

    /// Upsert the rolling status row for a monitor
    async fn upsert_monitor_status(&self, row: &MonitorStatusRow) -> Result<()>;

    /// Resolve regions by code
    async fn get_regions_by_codes(&self, codes: &[String]) -> Result<Vec<Region>>;

    /// Save a region (owned by the external health-monitoring process)
    async fn save_region(&self, region: &Region) -> Result<()>;
}

/// libsql-backed store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn monitor_from_row(row: &libsql::Row) -> Result<Monitor> {
    let regions_json: String = row.get(7)?;
    let config_json: String = row.get(8)?;
    let rules_json: String = row.get(9)?;

    Ok(Monitor {
        id: Some(row.get(0)?),
        org_id: row.get(1)?,
        name: row.get(2)?,
        interval_seconds: row.get::<i64>(4)? as u64,
        enabled: row.get::<i64>(5)? != 0,
        monitoring_mode: MonitoringMode::parse(&row.get::<String>(6)?),
        regions: serde_json::from_str(&regions_json)?,
        config: serde_json::from_str(&config_json)?,
        validation_rules: serde_json::from_str(&rules_json)?,
        created_at: Monitor::i64_to_timestamp(row.get(10)?),
        updated_at: Monitor::i64_to_timestamp(row.get(11)?),
    })
}

const MONITOR_COLUMNS: &str = "id, org_id, name, monitor_type, interval_seconds, enabled, \
     monitoring_mode, regions, config, validation_rules, created_at, updated_at";

#[async_trait]
impl Store for LibsqlStore {
    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"))
            .await?;

        let mut rows = stmt.query(params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE enabled = 1"))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }

        Ok(monitors)
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64> {
        let conn = self.get_conn().await?;
        let regions = serde_json::to_string(&monitor.regions)?;
        let config = serde_json::to_string(&monitor.config)?;
        let rules = serde_json::to_string(&monitor.validation_rules)?;
        let created_at = Monitor::timestamp_to_i64(monitor.created_at);
        let updated_at = Monitor::timestamp_to_i64(monitor.updated_at);

        if let Some(id) = monitor.id {
            conn.execute(
                "UPDATE monitors SET org_id = ?, name = ?, monitor_type = ?, interval_seconds = ?, \
                 enabled = ?, monitoring_mode = ?, regions = ?, config = ?, validation_rules = ?, \
                 updated_at = ? WHERE id = ?",
                params![
                    monitor.org_id,
                    monitor.name.clone(),
                    monitor.monitor_type().to_string(),
                    monitor.interval_seconds as i64,
                    if monitor.enabled { 1 } else { 0 },
                    monitor.monitoring_mode.to_string(),
                    regions,
                    config,
                    rules,
                    updated_at,
                    id
                ],
            )
            .await?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO monitors (org_id, name, monitor_type, interval_seconds, enabled, \
                 monitoring_mode, regions, config, validation_rules, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    monitor.org_id,
                    monitor.name.clone(),
                    monitor.monitor_type().to_string(),
                    monitor.interval_seconds as i64,
                    if monitor.enabled { 1 } else { 0 },
                    monitor.monitoring_mode.to_string(),
                    regions,
                    config,
                    rules,
                    created_at,
                    updated_at
                ],
            )
            .await?;

            Ok(conn.last_insert_rowid())
        }
    }

    async fn delete_monitor(&self, id: i64) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM monitors WHERE id = ?", params![id]).await?;
        // The status row lives and dies with its monitor.
        conn.execute("DELETE FROM monitor_status WHERE monitor_id = ?", params![id]).await?;
        Ok(())
    }

    async fn insert_check_event(&self, event: &CheckEvent) -> Result<i64> {
        let conn = self.get_conn().await?;
        let headers = serde_json::to_string(&event.headers)?;
        let validation_errors = serde_json::to_string(&event.validation_errors)?;

        conn.execute(
            "INSERT INTO check_events (monitor_id, org_id, timestamp, monitor_type, target, \
             region, status, response_time_ms, status_code, dns_ms, tcp_ms, tls_ms, ttfb_ms, \
             transfer_ms, headers, body_size_bytes, validation_errors, error_message, error_kind, \
             created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.monitor_id,
                event.org_id,
                Monitor::timestamp_to_i64(event.timestamp),
                event.monitor_type.to_string(),
                event.target.clone(),
                event.region.clone(),
                event.status.to_string(),
                event.response_time_ms as i64,
                event.status_code.map(|v| v as i64),
                event.timing.dns_ms.map(|v| v as i64),
                event.timing.tcp_ms.map(|v| v as i64),
                event.timing.tls_ms.map(|v| v as i64),
                event.timing.ttfb_ms.map(|v| v as i64),
                event.timing.transfer_ms.map(|v| v as i64),
                headers,
                event.body_size_bytes.map(|v| v as i64),
                validation_errors,
                event.error_message.clone(),
                event.error_kind.map(|k| k.to_string()),
                Monitor::timestamp_to_i64(event.created_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_check_events(&self, monitor_id: i64, limit: usize) -> Result<Vec<CheckEvent>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, monitor_id, org_id, timestamp, monitor_type, target, region, status, \
                 response_time_ms, status_code, dns_ms, tcp_ms, tls_ms, ttfb_ms, transfer_ms, \
                 headers, body_size_bytes, validation_errors, error_message, error_kind, created_at \
                 FROM check_events WHERE monitor_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .await?;

        let mut rows = stmt.query(params![monitor_id, limit as i64]).await?;
        let mut events = Vec::new();

        while let Some(row) = rows.next().await? {
            let monitor_type: String = row.get(4)?;
            let status: String = row.get(7)?;
            let headers_json: String = row.get(15)?;
            let errors_json: String = row.get(17)?;
            let error_kind: Option<String> = row.get(19)?;

            events.push(CheckEvent {
                id: Some(row.get(0)?),
                monitor_id: row.get(1)?,
                org_id: row.get(2)?,
                timestamp: Monitor::i64_to_timestamp(row.get(3)?),
                monitor_type: if monitor_type == "tcp" {
                    crate::monitoring::checker::MonitorType::Tcp
                } else {
                    crate::monitoring::checker::MonitorType::Http
                },
                target: row.get(5)?,
                region: row.get(6)?,
                status: CheckStatus::parse(&status),
                response_time_ms: row.get::<i64>(8)? as u64,
                status_code: row.get::<Option<i64>>(9)?.map(|v| v as u16),
                timing: Timing {
                    dns_ms: row.get::<Option<i64>>(10)?.map(|v| v as u64),
                    tcp_ms: row.get::<Option<i64>>(11)?.map(|v| v as u64),
                    tls_ms: row.get::<Option<i64>>(12)?.map(|v| v as u64),
                    ttfb_ms: row.get::<Option<i64>>(13)?.map(|v| v as u64),
                    transfer_ms: row.get::<Option<i64>>(14)?.map(|v| v as u64),
                },
                headers: serde_json::from_str(&headers_json)?,
                body_size_bytes: row.get::<Option<i64>>(16)?.map(|v| v as u64),
                validation_errors: serde_json::from_str(&errors_json)?,
                error_message: row.get(18)?,
                error_kind: error_kind.as_deref().and_then(ErrorKind::parse),
                created_at: Monitor::i64_to_timestamp(row.get(20)?),
            });
        }

        Ok(events)
    }

    async fn get_monitor_status(&self, monitor_id: i64) -> Result<Option<MonitorStatusRow>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT monitor_id, state, consecutive_successes, consecutive_failures, \
                 last_checked_at, updated_at FROM monitor_status WHERE monitor_id = ?",
            )
            .await?;

        let mut rows = stmt.query(params![monitor_id]).await?;
        if let Some(row) = rows.next().await? {
            let state: String = row.get(1)?;
            Ok(Some(MonitorStatusRow {
                monitor_id: row.get(0)?,
                state: MonitorState::parse(&state),
                consecutive_successes: row.get::<i64>(2)? as u64,
                consecutive_failures: row.get::<i64>(3)? as u64,
                last_checked_at: Monitor::i64_to_timestamp(row.get(4)?),
                updated_at: Monitor::i64_to_timestamp(row.get(5)?),
            }))
        } else {
            Ok(None)
        }
    }

    async fn upsert_monitor_status(&self, row: &MonitorStatusRow) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitor_status (monitor_id, state, consecutive_successes, \
             consecutive_failures, last_checked_at, updated_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(monitor_id) DO UPDATE SET \
                 state = excluded.state, \
                 consecutive_successes = excluded.consecutive_successes, \
                 consecutive_failures = excluded.consecutive_failures, \
                 last_checked_at = excluded.last_checked_at, \
                 updated_at = excluded.updated_at",
            params![
                row.monitor_id,
                row.state.to_string(),
                row.consecutive_successes as i64,
                row.consecutive_failures as i64,
                Monitor::timestamp_to_i64(row.last_checked_at),
                Monitor::timestamp_to_i64(row.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_regions_by_codes(&self, codes: &[String]) -> Result<Vec<Region>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT code, display_name, endpoint_url, enabled, healthy, last_health_check_at \
                 FROM regions",
            )
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut regions = Vec::new();
        while let Some(row) = rows.next().await? {
            let code: String = row.get(0)?;
            if !codes.contains(&code) {
                continue;
            }
            regions.push(Region {
                code,
                display_name: row.get(1)?,
                endpoint_url: row.get(2)?,
                enabled: row.get::<i64>(3)? != 0,
                healthy: row.get::<i64>(4)? != 0,
                last_health_check_at: row.get::<Option<i64>>(5)?.map(Monitor::i64_to_timestamp),
            });
        }

        Ok(regions)
    }

    async fn save_region(&self, region: &Region) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO regions (code, display_name, endpoint_url, enabled, healthy, \
             last_health_check_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(code) DO UPDATE SET \
                 display_name = excluded.display_name, \
                 endpoint_url = excluded.endpoint_url, \
                 enabled = excluded.enabled, \
                 healthy = excluded.healthy, \
                 last_health_check_at = excluded.last_health_check_at",
            params![
                region.code.clone(),
                region.display_name.clone(),
                region.endpoint_url.clone(),
                if region.enabled { 1 } else { 0 },
                if region.healthy { 1 } else { 0 },
                region.last_health_check_at.map(Monitor::timestamp_to_i64)
            ],
        )
        .await?;
        Ok(())
    }
}
