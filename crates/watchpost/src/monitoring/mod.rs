/// Monitoring engine module - performs and evaluates individual checks
///
/// This module is responsible for:
/// - Executing HTTP/TCP probes with a timing breakdown
/// - Evaluating declarative validation rules against a successful probe
/// - Aggregating multi-region results by strict majority
pub mod aggregate;
pub mod checker;
pub mod types;
pub mod validation;

pub use checker::{HttpConfig, ProbeConfig, TcpConfig, perform_check};
pub use types::{CheckResult, CheckStatus};
