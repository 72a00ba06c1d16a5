//! Process-wide template-level mutual exclusion (spec §4.7.1). A job may
//! not start unless `try_lock` succeeds; the lock is released once the
//! job's task exits, whether by success, failure, or panic.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct LockManager {
    in_flight: Mutex<HashSet<i64>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `template_id` iff it is not already held.
    pub fn try_lock(&self, template_id: i64) -> bool {
        let mut guard = self.in_flight.lock().expect("lock manager mutex poisoned");
        guard.insert(template_id)
    }

    pub fn unlock(&self, template_id: i64) {
        self.in_flight.lock().expect("lock manager mutex poisoned").remove(&template_id);
    }

    pub fn is_running(&self, template_id: i64) -> bool {
        self.in_flight.lock().expect("lock manager mutex poisoned").contains(&template_id)
    }
}

/// RAII guard releasing a template lock on drop, so a panicking job
/// task still frees it (spec §4.7.1: "released in a deferred cleanup
/// once the job's goroutine exits, whether by success, failure, or panic").
/// Holds an owned `Arc` rather than a borrow so it can be moved into the
/// detached `tokio::spawn` task that runs the job body.
pub struct LockGuard {
    manager: Arc<LockManager>,
    template_id: i64,
}

impl LockGuard {
    pub fn acquire(manager: Arc<LockManager>, template_id: i64) -> Option<Self> {
        if manager.try_lock(template_id) {
            Some(Self { manager, template_id })
        } else {
            None
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.unlock(self.template_id);
    }
}
