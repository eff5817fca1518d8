use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::monitoring::checker::{MonitorType, ProbeConfig};
use crate::monitoring::types::{CheckError, CheckResult, CheckStatus, ErrorKind, Timing};
use crate::monitoring::validation::ValidationRule;

/// Probe request dispatched to a regional agent (POST /execute).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub job_id: String,
    pub monitor_id: i64,
    pub monitor_type: MonitorType,
    pub config: ProbeConfig,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
}

/// Timing breakdown as it appears on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTiming {
    pub dns_ms: Option<u64>,
    pub tcp_ms: Option<u64>,
    pub tls_ms: Option<u64>,
    pub ttfb_ms: Option<u64>,
    pub transfer_ms: Option<u64>,
}

impl From<Timing> for WireTiming {
    fn from(t: Timing) -> Self {
        Self {
            dns_ms: t.dns_ms,
            tcp_ms: t.tcp_ms,
            tls_ms: t.tls_ms,
            ttfb_ms: t.ttfb_ms,
            transfer_ms: t.transfer_ms,
        }
    }
}

impl From<WireTiming> for Timing {
    fn from(t: WireTiming) -> Self {
        Self {
            dns_ms: t.dns_ms,
            tcp_ms: t.tcp_ms,
            tls_ms: t.tls_ms,
            ttfb_ms: t.ttfb_ms,
            transfer_ms: t.transfer_ms,
        }
    }
}

/// Error payload as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
}

/// Normalized probe result returned by a regional agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub job_id: String,
    pub region: String,
    pub status: CheckStatus,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<WireTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_size_bytes: Option<u64>,
}

impl ExecuteResponse {
    /// Build a response from a check result the agent just produced.
    pub fn from_result(job_id: String, region: String, result: &CheckResult) -> Self {
        Self {
            job_id,
            region,
            status: result.status,
            response_time_ms: result.response_time_ms,
            status_code: result.status_code,
            headers: (!result.headers.is_empty()).then(|| result.headers.clone()),
            timing: Some(result.timing.into()),
            error: result
                .error
                .as_ref()
                .map(|e| WireError { message: e.message.clone(), kind: e.kind }),
            validation_errors: (!result.validation_errors.is_empty())
                .then(|| result.validation_errors.clone()),
            body_size_bytes: result.body_size_bytes,
        }
    }

    /// Convert the agent's response back into the core's result model.
    ///
    /// `region` is the core's own record of which region it dispatched to;
    /// it wins over whatever the agent claims so one misconfigured agent
    /// cannot masquerade as another region in persisted events.
    pub fn into_check_result(self, region: &str) -> CheckResult {
        CheckResult {
            region: region.to_string(),
            status: self.status,
            response_time_ms: self.response_time_ms,
            status_code: self.status_code,
            headers: self.headers.unwrap_or_default(),
            body_size_bytes: self.body_size_bytes,
            timing: self.timing.map(Into::into).unwrap_or_default(),
            validation_errors: self.validation_errors.unwrap_or_default(),
            error: self.error.map(|e| CheckError { message: e.message, kind: e.kind }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::checker::TcpConfig;

    #[test]
    fn request_uses_camel_case_wire_keys() {
        let request = ExecuteRequest {
            job_id: "job-1".to_string(),
            monitor_id: 42,
            monitor_type: MonitorType::Tcp,
            config: ProbeConfig::Tcp(TcpConfig {
                host: "db.internal".to_string(),
                port: 5432,
                timeout_ms: 2000,
            }),
            validation_rules: Vec::new(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["monitorId"], 42);
        assert_eq!(json["monitorType"], "tcp");
        assert_eq!(json["config"]["host"], "db.internal");
    }

    #[test]
    fn agent_region_claim_does_not_override_dispatch_region() {
        let response = ExecuteResponse {
            job_id: "job-1".to_string(),
            region: "spoofed".to_string(),
            status: CheckStatus::Success,
            response_time_ms: 45,
            status_code: Some(200),
            headers: None,
            timing: None,
            error: None,
            validation_errors: None,
            body_size_bytes: None,
        };

        let result = response.into_check_result("eu-west");
        assert_eq!(result.region, "eu-west");
        assert_eq!(result.status, CheckStatus::Success);
    }
}
