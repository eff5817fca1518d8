//! Declarative validation rules applied to successful probes.
//!
//! The rule grammar is a fixed external contract: a list of rules goes in,
//! a list of violation strings comes out. Rules only ever run against a
//! probe that already succeeded at the transport level; a transport
//! failure is already a failure and is never "validated".

use serde::{Deserialize, Serialize};

use super::types::{CheckResult, CheckStatus};

/// A single declarative assertion against a check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationRule {
    StatusCodeEquals { value: u16 },
    StatusCodeIn { values: Vec<u16> },
    ResponseTimeBelow { max_ms: u64 },
    HeaderEquals { name: String, value: String },
    HeaderExists { name: String },
    BodyContains { needle: String },
    BodyNotContains { needle: String },
}

/// Evaluate every rule against the result and collect all violations.
///
/// Rules are independent and never short-circuit, so operators see every
/// broken assertion in one pass rather than just the first.
pub fn evaluate(result: &CheckResult, rules: &[ValidationRule], body: Option<&str>) -> Vec<String> {
    let mut violations = Vec::new();

    for rule in rules {
        match rule {
            ValidationRule::StatusCodeEquals { value } => match result.status_code {
                Some(code) if code == *value => {}
                Some(code) => violations.push(format!("expected status code {value}, got {code}")),
                None => violations.push(format!("expected status code {value}, but no status code was returned")),
            },
            ValidationRule::StatusCodeIn { values } => match result.status_code {
                Some(code) if values.contains(&code) => {}
                Some(code) => violations.push(format!("status code {code} not in allowed set {values:?}")),
                None => violations.push(format!("expected status code in {values:?}, but no status code was returned")),
            },
            ValidationRule::ResponseTimeBelow { max_ms } => {
                if result.response_time_ms >= *max_ms {
                    violations.push(format!(
                        "response time {}ms exceeds limit of {max_ms}ms",
                        result.response_time_ms
                    ));
                }
            }
            ValidationRule::HeaderEquals { name, value } => {
                match lookup_header(result, name) {
                    Some(actual) if actual == value => {}
                    Some(actual) => violations.push(format!("header '{name}' is '{actual}', expected '{value}'")),
                    None => violations.push(format!("header '{name}' is missing, expected '{value}'")),
                }
            }
            ValidationRule::HeaderExists { name } => {
                if lookup_header(result, name).is_none() {
                    violations.push(format!("header '{name}' is missing"));
                }
            }
            ValidationRule::BodyContains { needle } => match body {
                Some(text) if text.contains(needle.as_str()) => {}
                Some(_) => violations.push(format!("body does not contain '{needle}'")),
                None => violations.push(format!("body was not captured, cannot check for '{needle}'")),
            },
            ValidationRule::BodyNotContains { needle } => {
                if let Some(text) = body {
                    if text.contains(needle.as_str()) {
                        violations.push(format!("body contains forbidden '{needle}'"));
                    }
                }
            }
        }
    }

    violations
}

/// Run the validation engine and demote the result on any violation.
///
/// No-op unless the probe succeeded and rules are configured.
pub fn apply(result: &mut CheckResult, rules: &[ValidationRule], body: Option<&str>) {
    if result.status != CheckStatus::Success || rules.is_empty() {
        return;
    }

    let violations = evaluate(result, rules, body);
    if !violations.is_empty() {
        result.status = CheckStatus::Failure;
        result.validation_errors = violations;
    }
}

fn lookup_header<'a>(result: &'a CheckResult, name: &str) -> Option<&'a str> {
    // Header names are compared case-insensitively per RFC 9110.
    result
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
