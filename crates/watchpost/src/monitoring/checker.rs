use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use super::types::{CheckError, CheckResult, ErrorKind, Timing};

/// Kind of probe a monitor performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Tcp,
}

impl std::fmt::Display for MonitorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorType::Http => write!(f, "http"),
            MonitorType::Tcp => write!(f, "tcp"),
        }
    }
}

/// Authentication attached to an HTTP probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
}

/// Address family preference for outbound probes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    #[default]
    Any,
    V4,
    V6,
}

/// HTTP monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub ip_version: IpVersion,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// TCP monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Type-specific configuration of a monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeConfig {
    Http(HttpConfig),
    Tcp(TcpConfig),
}

impl ProbeConfig {
    pub fn monitor_type(&self) -> MonitorType {
        match self {
            ProbeConfig::Http(_) => MonitorType::Http,
            ProbeConfig::Tcp(_) => MonitorType::Tcp,
        }
    }

    /// Human-readable probe target, persisted on every check event
    pub fn target(&self) -> String {
        match self {
            ProbeConfig::Http(c) => c.url.clone(),
            ProbeConfig::Tcp(c) => format!("{}:{}", c.host, c.port),
        }
    }
}

/// A completed probe plus the captured response body, when one was read.
///
/// The body is kept out of [`CheckResult`] so it is never persisted or
/// shipped over the agent protocol; only its size is.
pub struct ProbeOutput {
    pub result: CheckResult,
    pub body: Option<String>,
}

impl ProbeOutput {
    fn bodyless(result: CheckResult) -> Self {
        Self { result, body: None }
    }
}

/// Execute exactly one probe for the given configuration.
///
/// Pure function of the config: transport-level problems become `failure`
/// or `timeout` results, they are never returned as errors (the caller
/// must always end up with something to persist).
pub async fn perform_check(config: &ProbeConfig, region: &str, body_capture_limit: usize) -> ProbeOutput {
    match config {
        ProbeConfig::Http(http) => http_check(http, region, body_capture_limit).await,
        ProbeConfig::Tcp(tcp) => ProbeOutput::bodyless(tcp_check(tcp, region).await),
    }
}

async fn http_check(config: &HttpConfig, region: &str, body_capture_limit: usize) -> ProbeOutput {
    match url::Url::parse(&config.url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(parsed) => {
            return ProbeOutput::bodyless(CheckResult::failure(
                region,
                0,
                CheckError::new(
                    ErrorKind::InvalidConfig,
                    format!("unsupported URL scheme '{}'", parsed.scheme()),
                ),
            ));
        }
        Err(e) => {
            return ProbeOutput::bodyless(CheckResult::failure(
                region,
                0,
                CheckError::new(ErrorKind::InvalidConfig, format!("invalid URL: {e}")),
            ));
        }
    }

    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms.max(1)))
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    match config.ip_version {
        IpVersion::Any => {}
        IpVersion::V4 => builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        IpVersion::V6 => builder = builder.local_address(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
    }

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    let client = match builder.build() {
        Ok(client) => client,
        Err(e) => {
            return ProbeOutput::bodyless(CheckResult::failure(
                region,
                0,
                CheckError::new(ErrorKind::InvalidConfig, format!("failed to build HTTP client: {e}")),
            ));
        }
    };

    let method = match reqwest::Method::from_bytes(config.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return ProbeOutput::bodyless(CheckResult::failure(
                region,
                0,
                CheckError::new(ErrorKind::InvalidConfig, format!("invalid HTTP method: {}", config.method)),
            ));
        }
    };

    let mut request = client.request(method, &config.url);
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    match &config.auth {
        Auth::None => {}
        Auth::Basic { username, password } => request = request.basic_auth(username, Some(password)),
        Auth::Bearer { token } => request = request.bearer_auth(token),
    }
    if let Some(body) = &config.body {
        request = request.body(body.clone());
    }

    let start = Instant::now();
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let elapsed = start.elapsed().as_millis() as u64;
            return ProbeOutput::bodyless(classify_transport_error(&e, region, elapsed));
        }
    };

    let ttfb_ms = start.elapsed().as_millis() as u64;
    let status_code = response.status().as_u16();
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    // Best-effort body capture, capped to bound memory use. Bytes past the
    // cap are still counted so body_size_bytes reflects the real size.
    let mut response = response;
    let mut captured: Vec<u8> = Vec::new();
    let mut total_bytes: u64 = 0;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                total_bytes += chunk.len() as u64;
                if captured.len() < body_capture_limit {
                    let remaining = body_capture_limit - captured.len();
                    captured.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stopped reading response body early");
                break;
            }
        }
    }

    let total_ms = start.elapsed().as_millis() as u64;
    let timing = Timing {
        dns_ms: None,
        tcp_ms: None,
        tls_ms: None,
        ttfb_ms: Some(ttfb_ms),
        transfer_ms: Some(total_ms.saturating_sub(ttfb_ms)),
    };

    // 2xx and 3xx count as a reachable endpoint; 4xx/5xx are failures
    // unless a validation rule says otherwise downstream.
    let success = (200..400).contains(&status_code);
    let mut result = if success {
        CheckResult::success(region, total_ms)
    } else {
        CheckResult::failure(
            region,
            total_ms,
            CheckError::new(ErrorKind::Http, format!("HTTP status {status_code}")),
        )
    };
    result = result.with_http(status_code, headers, total_bytes, timing);

    // An empty body that was read still counts as captured; None is
    // reserved for capture being disabled, so body rules report "empty"
    // rather than "not captured".
    let body = (body_capture_limit > 0).then(|| String::from_utf8_lossy(&captured).into_owned());
    ProbeOutput { result, body }
}

async fn tcp_check(config: &TcpConfig, region: &str) -> CheckResult {
    let target = format!("{}:{}", config.host, config.port);
    let timeout_duration = Duration::from_millis(config.timeout_ms.max(1));

    let start = Instant::now();
    let connect = tokio::net::TcpStream::connect(&target);

    match timeout(timeout_duration, connect).await {
        Ok(Ok(_stream)) => CheckResult::success(region, start.elapsed().as_millis() as u64),
        Ok(Err(e)) => CheckResult::failure(
            region,
            start.elapsed().as_millis() as u64,
            CheckError::new(ErrorKind::Connection, format!("TCP connection failed: {e}")),
        ),
        Err(_) => CheckResult::timeout(
            region,
            start.elapsed().as_millis() as u64,
            format!("TCP connection to {target} timed out after {}ms", config.timeout_ms),
        ),
    }
}

fn classify_transport_error(error: &reqwest::Error, region: &str, elapsed_ms: u64) -> CheckResult {
    if error.is_timeout() {
        return CheckResult::timeout(region, elapsed_ms, format!("request timed out: {error}"));
    }

    // reqwest does not expose the failing phase directly; fall back to the
    // rendered error chain to classify DNS and TLS problems.
    let rendered = format!("{error:?}").to_lowercase();
    let kind = if rendered.contains("dns") {
        ErrorKind::Dns
    } else if rendered.contains("tls") || rendered.contains("certificate") {
        ErrorKind::Tls
    } else {
        ErrorKind::Connection
    };

    CheckResult::failure(region, elapsed_ms, CheckError::new(kind, format!("request failed: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::CheckStatus;

    #[tokio::test]
    async fn tcp_check_succeeds_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let config = TcpConfig { host: addr.ip().to_string(), port: addr.port(), timeout_ms: 2000 };
        let result = tcp_check(&config, "local").await;

        assert_eq!(result.status, CheckStatus::Success);
        assert!(result.error.is_none());
        assert!(result.status_code.is_none());
    }

    #[tokio::test]
    async fn tcp_check_reports_failure_for_closed_port() {
        // Bind and immediately drop to get a port that refuses connections.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = TcpConfig { host: addr.ip().to_string(), port: addr.port(), timeout_ms: 2000 };
        let result = tcp_check(&config, "local").await;

        assert_ne!(result.status, CheckStatus::Success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn http_check_flags_invalid_method() {
        let config = HttpConfig {
            url: "http://127.0.0.1:1/".to_string(),
            method: "NOT A METHOD".to_string(),
            headers: HashMap::new(),
            body: None,
            auth: Auth::None,
            follow_redirects: true,
            timeout_ms: 1000,
            ip_version: IpVersion::Any,
            user_agent: None,
        };

        let output = http_check(&config, "local", 1024).await;
        assert_eq!(output.result.status, CheckStatus::Failure);
        assert_eq!(output.result.error.unwrap().kind, ErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn http_check_captures_an_empty_body_as_empty() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
            let _ = socket.shutdown().await;
        });

        let config = HttpConfig {
            url: format!("http://{addr}/"),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            auth: Auth::None,
            follow_redirects: true,
            timeout_ms: 2000,
            ip_version: IpVersion::Any,
            user_agent: None,
        };

        let output = http_check(&config, "local", 1024).await;
        assert_eq!(output.result.status, CheckStatus::Success);
        // Empty but captured, so body rules can evaluate truthfully.
        assert_eq!(output.body.as_deref(), Some(""));
        assert_eq!(output.result.body_size_bytes, Some(0));
    }

    #[tokio::test]
    async fn http_check_flags_unsupported_scheme() {
        let config = HttpConfig {
            url: "ftp://example.com/".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            auth: Auth::None,
            follow_redirects: true,
            timeout_ms: 1000,
            ip_version: IpVersion::Any,
            user_agent: None,
        };

        let output = http_check(&config, "local", 1024).await;
        assert_eq!(output.result.status, CheckStatus::Failure);
        assert_eq!(output.result.error.unwrap().kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn probe_config_target_formats() {
        let tcp = ProbeConfig::Tcp(TcpConfig { host: "db.internal".into(), port: 5432, timeout_ms: 2000 });
        assert_eq!(tcp.target(), "db.internal:5432");
        assert_eq!(tcp.monitor_type(), MonitorType::Tcp);
    }
}
