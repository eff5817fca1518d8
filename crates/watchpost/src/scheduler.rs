use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Errors from schedule registration.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("check interval must be at least {min}s, got {got}s")]
    IntervalTooShort { min: u64, got: u64 },
}

/// Tracks which monitors currently have a check in flight.
///
/// A slot is claimed at enqueue time, before the job ever reaches the
/// queue, so a slow worker pool cannot let two jobs for the same monitor
/// coexist. The slot is released when the job (and therefore its
/// [`InflightSlot`]) is dropped, whether the check ran or not.
#[derive(Debug, Default)]
pub struct InflightGuard {
    active: Mutex<HashSet<i64>>,
}

impl InflightGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the in-flight slot for a monitor. Returns None when a check
    /// for that monitor is already queued or running.
    pub fn try_begin(self: &Arc<Self>, monitor_id: i64) -> Option<InflightSlot> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.insert(monitor_id) {
            Some(InflightSlot { guard: Arc::clone(self), monitor_id })
        } else {
            None
        }
    }

    pub fn is_inflight(&self, monitor_id: i64) -> bool {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).contains(&monitor_id)
    }

    fn end(&self, monitor_id: i64) {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).remove(&monitor_id);
    }
}

/// RAII handle for one monitor's in-flight slot.
#[derive(Debug)]
pub struct InflightSlot {
    guard: Arc<InflightGuard>,
    monitor_id: i64,
}

impl Drop for InflightSlot {
    fn drop(&mut self) {
        self.guard.end(self.monitor_id);
    }
}

/// A queued check execution for one monitor.
#[derive(Debug)]
pub struct CheckJob {
    pub monitor_id: i64,
    pub enqueued_at: DateTime<Utc>,
    pub interval_seconds: u64,
    token: Arc<AtomicBool>,
    _slot: InflightSlot,
}

impl CheckJob {
    /// True when the schedule that produced this job has since been
    /// removed or replaced; such jobs are dropped without running.
    pub fn is_cancelled(&self) -> bool {
        self.token.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(monitor_id: i64) -> Self {
        let guard = InflightGuard::new();
        let slot = guard.try_begin(monitor_id).unwrap();
        Self {
            monitor_id,
            enqueued_at: Utc::now(),
            interval_seconds: 60,
            token: Arc::new(AtomicBool::new(false)),
            _slot: slot,
        }
    }
}

struct ScheduleEntry {
    handle: JoinHandle<()>,
    token: Arc<AtomicBool>,
    interval_seconds: u64,
}

/// Per-monitor interval scheduler.
///
/// Each scheduled monitor owns one tokio interval task that enqueues a
/// [`CheckJob`] on every tick. Scheduling is idempotent: re-scheduling a
/// monitor cancels and replaces its existing task, so at most one task
/// per monitor exists at any time.
pub struct Scheduler {
    entries: Mutex<HashMap<i64, ScheduleEntry>>,
    job_tx: mpsc::Sender<CheckJob>,
    inflight: Arc<InflightGuard>,
    min_interval_seconds: u64,
}

impl Scheduler {
    pub fn new(
        job_tx: mpsc::Sender<CheckJob>,
        inflight: Arc<InflightGuard>,
        min_interval_seconds: u64,
    ) -> Self {
        Self { entries: Mutex::new(HashMap::new()), job_tx, inflight, min_interval_seconds }
    }

    /// Register (or replace) the recurring schedule for a monitor.
    pub fn schedule_monitor(&self, monitor_id: i64, interval_seconds: u64) -> Result<(), ScheduleError> {
        if interval_seconds < self.min_interval_seconds {
            return Err(ScheduleError::IntervalTooShort {
                min: self.min_interval_seconds,
                got: interval_seconds,
            });
        }

        let token = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_interval(
            monitor_id,
            interval_seconds,
            self.job_tx.clone(),
            Arc::clone(&self.inflight),
            Arc::clone(&token),
        ));

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = entries.insert(monitor_id, ScheduleEntry { handle, token, interval_seconds })
        {
            old.token.store(true, Ordering::Relaxed);
            old.handle.abort();
            tracing::debug!(monitor_id, "Replaced existing schedule");
        } else {
            tracing::info!(monitor_id, interval_seconds, "Scheduled monitor");
        }

        Ok(())
    }

    /// Cancel the schedule for a monitor. Idempotent.
    pub fn remove_monitor_schedule(&self, monitor_id: i64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.remove(&monitor_id) {
            entry.token.store(true, Ordering::Relaxed);
            entry.handle.abort();
            tracing::info!(monitor_id, "Removed monitor schedule");
        }
    }

    /// Re-register a monitor whose interval (or enablement) changed.
    pub fn update_monitor_schedule(
        &self,
        monitor_id: i64,
        interval_seconds: u64,
        enabled: bool,
    ) -> Result<(), ScheduleError> {
        if enabled {
            self.schedule_monitor(monitor_id, interval_seconds)
        } else {
            self.remove_monitor_schedule(monitor_id);
            Ok(())
        }
    }

    /// Cancel every schedule; used on startup before a full reload.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (_, entry) in entries.drain() {
            entry.token.store(true, Ordering::Relaxed);
            entry.handle.abort();
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn scheduled_ids(&self) -> Vec<i64> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).keys().copied().collect()
    }

    pub fn scheduled_interval(&self, monitor_id: i64) -> Option<u64> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&monitor_id)
            .map(|e| e.interval_seconds)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn run_interval(
    monitor_id: i64,
    interval_seconds: u64,
    job_tx: mpsc::Sender<CheckJob>,
    inflight: Arc<InflightGuard>,
    token: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
    // Backed-up ticks collapse into one; a stalled check never produces
    // a burst of catch-up checks afterwards.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a freshly scheduled
    // monitor waits one full interval before its first check.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if token.load(Ordering::Relaxed) {
            return;
        }

        let Some(slot) = inflight.try_begin(monitor_id) else {
            tracing::debug!(monitor_id, "Previous check still in flight, skipping tick");
            continue;
        };

        let job = CheckJob {
            monitor_id,
            enqueued_at: Utc::now(),
            interval_seconds,
            token: Arc::clone(&token),
            _slot: slot,
        };

        if job_tx.send(job).await.is_err() {
            tracing::warn!(monitor_id, "Job queue closed, stopping schedule");
            return;
        }
    }
}
