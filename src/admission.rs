//! Admission and load accounting
//!
//! Tracks the in-flight request count against the hard cap and exposes the
//! free-slot computation behind the proactive scale signal. Admission uses
//! an unlocked fast-path read followed by a locked recheck, so concurrent
//! admissions can never push `active` past the cap.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Shared request-state counters for this replica
pub struct LoadState {
    active: AtomicI64,
    request_counter: AtomicU64,
    deny_counter: AtomicU64,
    admission_mu: Mutex<()>,
    last_activity: Mutex<Instant>,
    /// Readers: config/view refresh. Writer: idle retirement.
    idle_gate: RwLock<()>,
}

impl LoadState {
    pub fn new() -> Self {
        Self {
            active: AtomicI64::new(0),
            request_counter: AtomicU64::new(0),
            deny_counter: AtomicU64::new(0),
            admission_mu: Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
            idle_gate: RwLock::new(()),
        }
    }

    /// Current in-flight request count
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Try to admit one request under the hard cap.
    ///
    /// Returns false when the replica is saturated. The cap is rechecked
    /// under the admission mutex after the unlocked fast path.
    pub fn try_admit(&self, max_requests: i64) -> bool {
        if self.active() >= max_requests {
            return false;
        }

        let _guard = self.admission_mu.lock().unwrap();
        if self.active() >= max_requests {
            return false;
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Release one admitted request: a single decrement plus an activity
    /// timestamp update. Called exactly once per admitted request.
    pub fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.touch();
    }

    /// Record activity now (resets the idle clock)
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Time since the last forwarder completion (or process start)
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Slack below the soft target; negative when past it
    pub fn free_slots(&self, soft_target: i64) -> i64 {
        soft_target - self.active()
    }

    /// Post-increment the monotonic request counter
    pub fn next_request_number(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count one rejected request
    pub fn record_denial(&self) {
        self.deny_counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> u64 {
        self.request_counter.load(Ordering::SeqCst)
    }

    pub fn deny_count(&self) -> u64 {
        self.deny_counter.load(Ordering::SeqCst)
    }

    /// Lock coupling refreshes (readers) with idle retirement (writer)
    pub fn idle_gate(&self) -> &RwLock<()> {
        &self.idle_gate
    }
}

impl Default for LoadState {
    fn default() -> Self {
        Self::new()
    }
}
