use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use todosync_core::Item;

pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_secs(2);

/// What the watcher is expected to report back after an engine write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Modified(i64),
    Removed,
}

impl Echo {
    pub fn of(item: &Item) -> Self {
        if item.status.is_deleted() {
            Echo::Removed
        } else {
            Echo::Modified(item.modified_at)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Released {
    at: Instant,
    expected: Option<Echo>,
}

/// Keys the engine is currently writing, plus the single-flight pass flag.
pub struct SuppressionGuard {
    writing: Mutex<HashMap<String, Option<Echo>>>,
    released: Mutex<HashMap<String, Released>>,
    running: AtomicBool,
    echo_window: Duration,
}

impl Default for SuppressionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SuppressionGuard {
    pub fn new() -> Self {
        Self::with_echo_window(DEFAULT_ECHO_WINDOW)
    }

    pub fn with_echo_window(echo_window: Duration) -> Self {
        Self {
            writing: Mutex::new(HashMap::new()),
            released: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            echo_window,
        }
    }

    pub fn begin_write(&self, key: &str) {
        lock(&self.writing).entry(key.to_string()).or_insert(None);
    }

    /// Records the state the pending write will leave behind.
    pub fn expect_echo(&self, key: &str, echo: Echo) {
        if let Some(slot) = lock(&self.writing).get_mut(key) {
            *slot = Some(echo);
        }
    }

    pub fn end_write(&self, key: &str) {
        let Some(expected) = lock(&self.writing).remove(key) else {
            return;
        };
        let now = Instant::now();
        let mut released = lock(&self.released);
        released.retain(|_, entry| now.duration_since(entry.at) <= self.echo_window);
        released.insert(key.to_string(), Released { at: now, expected });
    }

    pub fn suppress(&self, key: &str) -> WriteGuard<'_> {
        self.begin_write(key);
        WriteGuard {
            guard: self,
            key: key.to_string(),
        }
    }

    pub fn is_suppressed(&self, key: &str) -> bool {
        lock(&self.writing).contains_key(key)
    }

    /// Decides whether a mutation observed at `observed_at` belongs in the journal.
    pub fn should_capture(&self, key: &str, echo: Echo, observed_at: Instant) -> bool {
        if self.is_suppressed(key) {
            return false;
        }
        let mut released = lock(&self.released);
        let Some(entry) = released.get(key).copied() else {
            return true;
        };
        if observed_at <= entry.at {
            return false;
        }
        let within_window = observed_at.duration_since(entry.at) <= self.echo_window;
        if within_window && entry.expected == Some(echo) {
            return false;
        }
        released.remove(key);
        true
    }

    pub fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn acquire_pass(&self) -> Option<PassPermit<'_>> {
        self.try_acquire().then_some(PassPermit { guard: self })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ends the write for its key on drop.
pub struct WriteGuard<'a> {
    guard: &'a SuppressionGuard,
    key: String,
}

impl WriteGuard<'_> {
    pub fn expect(&self, echo: Echo) {
        self.guard.expect_echo(&self.key, echo);
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.guard.end_write(&self.key);
    }
}

pub struct PassPermit<'a> {
    guard: &'a SuppressionGuard,
}

impl Drop for PassPermit<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}
