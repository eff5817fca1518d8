//! Quorum aggregation of multi-region check results.

use super::types::{CheckResult, CheckStatus};

/// Collapse per-region results into one aggregate outcome.
///
/// Strict majority: more than half of the regions must report success for
/// the aggregate to be a success; timeouts count against the quorum. The
/// aggregate response time is the arithmetic mean over the successful
/// regions only (0 when none succeeded), so one slow failing region cannot
/// skew the latency a user sees for an otherwise healthy endpoint.
pub fn aggregate_results(results: &[CheckResult]) -> (CheckStatus, u64) {
    let successes: Vec<&CheckResult> = results.iter().filter(|r| r.status.is_success()).collect();

    let status = if successes.len() * 2 > results.len() {
        CheckStatus::Success
    } else {
        CheckStatus::Failure
    };

    let response_time_ms = if successes.is_empty() {
        0
    } else {
        successes.iter().map(|r| r.response_time_ms).sum::<u64>() / successes.len() as u64
    };

    (status, response_time_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{CheckError, ErrorKind};

    fn success(region: &str, ms: u64) -> CheckResult {
        CheckResult::success(region, ms)
    }

    fn failure(region: &str, ms: u64) -> CheckResult {
        CheckResult::failure(region, ms, CheckError::new(ErrorKind::Connection, "refused"))
    }

    #[test]
    fn two_of_three_successes_win_the_vote() {
        let results = vec![success("us-east", 40), success("eu-west", 60), failure("ap-south", 500)];
        let (status, response_time) = aggregate_results(&results);

        assert_eq!(status, CheckStatus::Success);
        // Mean of the two successful regions only.
        assert_eq!(response_time, 50);
    }

    #[test]
    fn one_of_three_successes_loses_the_vote() {
        let results = vec![failure("us-east", 40), failure("eu-west", 60), success("ap-south", 30)];
        let (status, response_time) = aggregate_results(&results);

        assert_eq!(status, CheckStatus::Failure);
        assert_eq!(response_time, 30);
    }

    #[test]
    fn exact_half_is_not_a_majority() {
        let results = vec![success("us-east", 40), failure("eu-west", 60)];
        let (status, _) = aggregate_results(&results);
        assert_eq!(status, CheckStatus::Failure);
    }

    #[test]
    fn timeouts_count_against_the_quorum() {
        let results = vec![
            success("us-east", 40),
            CheckResult::timeout("eu-west", 60_000, "timed out"),
            CheckResult::timeout("ap-south", 60_000, "timed out"),
        ];
        let (status, _) = aggregate_results(&results);
        assert_eq!(status, CheckStatus::Failure);
    }

    #[test]
    fn all_failures_yield_zero_response_time() {
        let results = vec![failure("us-east", 40), failure("eu-west", 60)];
        let (status, response_time) = aggregate_results(&results);
        assert_eq!(status, CheckStatus::Failure);
        assert_eq!(response_time, 0);
    }
}
