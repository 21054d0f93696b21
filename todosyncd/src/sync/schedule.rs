use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Interval,
    AfterSave,
}

/// When to start a pass. A zero duration disables that trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSchedule {
    pub sync_interval: Duration,
    pub on_save_delay: Duration,
}

impl SyncSchedule {
    pub fn is_enabled(&self) -> bool {
        !self.sync_interval.is_zero() || !self.on_save_delay.is_zero()
    }

    /// Times are epoch milliseconds; `last_change` is the pending, unsynced local change.
    pub fn due(&self, now: i64, last_sync: i64, last_change: Option<i64>) -> Option<TriggerReason> {
        if !self.sync_interval.is_zero() && elapsed(now, last_sync) >= self.sync_interval {
            return Some(TriggerReason::Interval);
        }
        if !self.on_save_delay.is_zero()
            && let Some(changed) = last_change
            && elapsed(now, changed) >= self.on_save_delay
        {
            return Some(TriggerReason::AfterSave);
        }
        None
    }
}

fn elapsed(now: i64, since: i64) -> Duration {
    Duration::from_millis(now.saturating_sub(since).max(0) as u64)
}
