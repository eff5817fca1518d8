use chrono::{DateTime, Utc};

use crate::database::models::{MonitorState, MonitorStatusRow};
use crate::monitoring::types::CheckStatus;

/// Fold one effective check outcome into a monitor's rolling status.
///
/// The state flips on every transition with no hysteresis; consecutive
/// counters reset to 1 on a flip and extend the current run otherwise.
/// Exactly one counter is non-zero in the returned row. Timeout counts
/// as failure here.
pub fn advance(
    monitor_id: i64,
    previous: Option<&MonitorStatusRow>,
    effective: CheckStatus,
    now: DateTime<Utc>,
) -> MonitorStatusRow {
    let success = effective.is_success();

    let (state, successes, failures) = match previous {
        Some(prev) if success && prev.state == MonitorState::Up => {
            (MonitorState::Up, prev.consecutive_successes + 1, 0)
        }
        Some(prev) if !success && prev.state == MonitorState::Down => {
            (MonitorState::Down, 0, prev.consecutive_failures + 1)
        }
        _ if success => (MonitorState::Up, 1, 0),
        _ => (MonitorState::Down, 0, 1),
    };

    MonitorStatusRow {
        monitor_id,
        state,
        consecutive_successes: successes,
        consecutive_failures: failures,
        last_checked_at: now,
        updated_at: now,
    }
}
