use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a single probe.
///
/// Timeout behaves like failure for the status counters but carries
/// distinct semantics for alerting and metrics, so it stays a separate
/// variant rather than being folded into a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failure,
    Timeout,
}

impl CheckStatus {
    pub fn is_success(self) -> bool {
        matches!(self, CheckStatus::Success)
    }

    /// Parse the persisted column value; anything unrecognized is a failure.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => CheckStatus::Success,
            "timeout" => CheckStatus::Timeout,
            _ => CheckStatus::Failure,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Success => write!(f, "success"),
            CheckStatus::Failure => write!(f, "failure"),
            CheckStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Classified cause of a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Dns,
    Tls,
    Http,
    InvalidConfig,
    AgentError,
    InternalError,
}

impl ErrorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(ErrorKind::Timeout),
            "connection" => Some(ErrorKind::Connection),
            "dns" => Some(ErrorKind::Dns),
            "tls" => Some(ErrorKind::Tls),
            "http" => Some(ErrorKind::Http),
            "invalid_config" => Some(ErrorKind::InvalidConfig),
            "agent_error" => Some(ErrorKind::AgentError),
            "internal_error" => Some(ErrorKind::InternalError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Dns => "dns",
            ErrorKind::Tls => "tls",
            ErrorKind::Http => "http",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::AgentError => "agent_error",
            ErrorKind::InternalError => "internal_error",
        };
        write!(f, "{name}")
    }
}

/// Error attached to a failed or timed-out check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckError {
    pub message: String,
    pub kind: ErrorKind,
}

impl CheckError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

/// Per-phase timing breakdown in milliseconds.
///
/// Phases the HTTP client does not expose stay `None`; values are never
/// fabricated from the total.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timing {
    pub dns_ms: Option<u64>,
    pub tcp_ms: Option<u64>,
    pub tls_ms: Option<u64>,
    pub ttfb_ms: Option<u64>,
    pub transfer_ms: Option<u64>,
}

/// Result of one probe execution, local or regional.
///
/// HTTP and TCP probes share this shape; a TCP probe simply leaves the
/// HTTP-only fields empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Region code the probe ran from (`"local"` for direct execution)
    pub region: String,

    pub status: CheckStatus,

    /// Total probe duration in milliseconds
    pub response_time_ms: u64,

    /// HTTP status code (if applicable)
    pub status_code: Option<u16>,

    /// Response headers (if applicable)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Size of the response body in bytes, when one was read
    pub body_size_bytes: Option<u64>,

    #[serde(default)]
    pub timing: Timing,

    /// Violation messages from the validation engine; non-empty only when
    /// a successful probe was demoted to failure
    #[serde(default)]
    pub validation_errors: Vec<String>,

    pub error: Option<CheckError>,
}

impl CheckResult {
    /// Create a successful result
    pub fn success(region: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            region: region.into(),
            status: CheckStatus::Success,
            response_time_ms,
            status_code: None,
            headers: HashMap::new(),
            body_size_bytes: None,
            timing: Timing::default(),
            validation_errors: Vec::new(),
            error: None,
        }
    }

    /// Create a failed result with a classified error
    pub fn failure(region: impl Into<String>, response_time_ms: u64, error: CheckError) -> Self {
        Self {
            region: region.into(),
            status: CheckStatus::Failure,
            response_time_ms,
            status_code: None,
            headers: HashMap::new(),
            body_size_bytes: None,
            timing: Timing::default(),
            validation_errors: Vec::new(),
            error: Some(error),
        }
    }

    /// Create a timed-out result
    pub fn timeout(region: impl Into<String>, response_time_ms: u64, message: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            status: CheckStatus::Timeout,
            response_time_ms,
            status_code: None,
            headers: HashMap::new(),
            body_size_bytes: None,
            timing: Timing::default(),
            validation_errors: Vec::new(),
            error: Some(CheckError::new(ErrorKind::Timeout, message)),
        }
    }

    /// Attach the HTTP-specific fields to a result
    pub fn with_http(
        mut self,
        status_code: u16,
        headers: HashMap<String, String>,
        body_size_bytes: u64,
        timing: Timing,
    ) -> Self {
        self.status_code = Some(status_code);
        self.headers = headers;
        self.body_size_bytes = Some(body_size_bytes);
        self.timing = timing;
        self
    }
}
