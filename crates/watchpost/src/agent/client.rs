use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::warn;

use super::protocol::{ExecuteRequest, ExecuteResponse};
use crate::monitoring::types::{CheckError, CheckResult, ErrorKind};

/// Default end-to-end bound on one agent call.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for dispatching probe requests to regional agents.
pub struct AgentClient {
    client: reqwest::Client,
}

impl AgentClient {
    /// Create a client whose calls are bounded end-to-end by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Dispatch one probe to the agent at `endpoint_url` and normalize the
    /// outcome.
    ///
    /// Never returns an error: anything that keeps a real probe result from
    /// coming back (network failure, a non-2xx from the agent itself, an
    /// unparseable body, the 60s bound) becomes a `failure` result tagged
    /// `agent_error` so sibling region calls are unaffected.
    pub async fn execute(&self, region: &str, endpoint_url: &str, request: &ExecuteRequest) -> CheckResult {
        let url = format!("{}/execute", endpoint_url.trim_end_matches('/'));
        let start = Instant::now();

        let response = match self.client.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(region, error = %e, "failed to reach regional agent");
                return agent_error(region, start, format!("failed to reach agent: {e}"));
            }
        };

        // A non-2xx from the agent itself is an agent fault, never parsed
        // as a probe result.
        if !response.status().is_success() {
            let status = response.status();
            warn!(region, %status, "regional agent returned an error status");
            return agent_error(region, start, format!("agent returned HTTP {status}"));
        }

        match response.json::<ExecuteResponse>().await {
            Ok(parsed) => parsed.into_check_result(region),
            Err(e) => {
                warn!(region, error = %e, "failed to parse agent response");
                agent_error(region, start, format!("unparseable agent response: {e}"))
            }
        }
    }
}

fn agent_error(region: &str, start: Instant, message: String) -> CheckResult {
    CheckResult::failure(
        region,
        start.elapsed().as_millis() as u64,
        CheckError::new(ErrorKind::AgentError, message),
    )
}
