use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::checker::{MonitorType, ProbeConfig};
use crate::monitoring::types::{CheckResult, CheckStatus, ErrorKind, Timing};
use crate::monitoring::validation::ValidationRule;

/// Where a monitor's checks execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringMode {
    /// Probe directly from the core service
    Local,
    /// Fan the probe out to the selected regional agents
    Global,
}

impl std::fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitoringMode::Local => write!(f, "local"),
            MonitoringMode::Global => write!(f, "global"),
        }
    }
}

impl MonitoringMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "global" => MonitoringMode::Global,
            _ => MonitoringMode::Local,
        }
    }
}

/// Monitor model - a user-configured probe target.
///
/// Owned by the configuration store and mutated only through the external
/// configuration API; the scheduling core treats it as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Option<i64>,
    pub org_id: i64,
    pub name: String,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub monitoring_mode: MonitoringMode,
    /// Selected region codes; meaningful only in global mode
    pub regions: Vec<String>,
    pub config: ProbeConfig,
    pub validation_rules: Vec<ValidationRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new local monitor with defaults
    pub fn new(org_id: i64, name: String, config: ProbeConfig) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            org_id,
            name,
            interval_seconds: 60,
            enabled: true,
            monitoring_mode: MonitoringMode::Local,
            regions: Vec::new(),
            config,
            validation_rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn monitor_type(&self) -> MonitorType {
        self.config.monitor_type()
    }

    pub fn target(&self) -> String {
        self.config.target()
    }

    /// Convert a DateTime to a unix millisecond timestamp column value
    pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    /// Convert a unix millisecond timestamp column value to a DateTime
    pub fn i64_to_timestamp(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
    }
}

/// Rolling up/down state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Up,
    Down,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Up => write!(f, "up"),
            MonitorState::Down => write!(f, "down"),
        }
    }
}

impl MonitorState {
    pub fn parse(s: &str) -> Self {
        match s {
            "up" => MonitorState::Up,
            _ => MonitorState::Down,
        }
    }
}

/// MonitorStatus row - one per monitor, updated after every check.
///
/// Invariant: exactly one of the two consecutive counters is non-zero.
/// Downstream incident logic reads these counters and applies its own
/// debounce threshold; no hysteresis happens at this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatusRow {
    pub monitor_id: i64,
    pub state: MonitorState,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
    pub last_checked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CheckEvent - the immutable, persisted record of one probe's outcome.
///
/// Append-only: this engine never updates or deletes check events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckEvent {
    pub id: Option<i64>,
    pub monitor_id: i64,
    pub org_id: i64,
    pub timestamp: DateTime<Utc>,
    pub monitor_type: MonitorType,
    pub target: String,
    pub region: String,
    pub status: CheckStatus,
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub timing: Timing,
    pub headers: HashMap<String, String>,
    pub body_size_bytes: Option<u64>,
    pub validation_errors: Vec<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
}

impl CheckEvent {
    /// Flatten a check result into a persistable event
    pub fn from_result(monitor_id: i64, monitor: &Monitor, result: &CheckResult) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            monitor_id,
            org_id: monitor.org_id,
            timestamp: now,
            monitor_type: monitor.monitor_type(),
            target: monitor.target(),
            region: result.region.clone(),
            status: result.status,
            response_time_ms: result.response_time_ms,
            status_code: result.status_code,
            timing: result.timing,
            headers: result.headers.clone(),
            body_size_bytes: result.body_size_bytes,
            validation_errors: result.validation_errors.clone(),
            error_message: result.error.as_ref().map(|e| e.message.clone()),
            error_kind: result.error.as_ref().map(|e| e.kind),
            created_at: now,
        }
    }

    /// Synthesize the event recorded when check processing itself blew up.
    ///
    /// The monitor may not have loaded at all, so only the id from the job
    /// is guaranteed; everything else stays empty.
    pub fn internal_error(monitor_id: i64, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            monitor_id,
            org_id: 0,
            timestamp: now,
            monitor_type: MonitorType::Http,
            target: String::new(),
            region: "local".to_string(),
            status: CheckStatus::Failure,
            response_time_ms: 0,
            status_code: None,
            timing: Timing::default(),
            headers: HashMap::new(),
            body_size_bytes: None,
            validation_errors: Vec::new(),
            error_message: Some(message.into()),
            error_kind: Some(ErrorKind::InternalError),
            created_at: now,
        }
    }
}

/// Region - a remote execution location.
///
/// Read-only to the executor; health is owned by a separate monitoring
/// process that flips `healthy` and stamps `last_health_check_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub code: String,
    pub display_name: String,
    pub endpoint_url: String,
    pub enabled: bool,
    pub healthy: bool,
    pub last_health_check_at: Option<DateTime<Utc>>,
}
