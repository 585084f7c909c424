//! Cooperative timeout state.
//!
//! A [`TimeoutState`] is shared between a computer's script engine and every
//! capability it calls.  The engine starts the timer when it resumes a program
//! and stops it when the program yields.  Long-running host code polls
//! [`TimeoutState::check`] and bails out once the program has run for too
//! long.
//!
//! ```text
//!  start ──► running ──(timeout)──► soft abort ──(abort timeout)──► hard abort
//!              │  ▲
//!        pause │  │ resume
//!              ▼  │
//!             paused
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ComputerConfig;
use crate::error::CapabilityError;

/// The message a program sees when it is aborted for not yielding.
pub const TIMEOUT_MESSAGE: &str = "Too long without yielding";

#[derive(Debug, Default)]
struct Timer {
    /// When the current running stretch began; `None` while stopped or paused.
    started: Option<Instant>,
    /// Time accumulated before the most recent pause.
    banked: Duration,
}

#[derive(Debug)]
struct TimeoutInner {
    timeout: Duration,
    abort_timeout: Duration,
    timer: Mutex<Timer>,
    soft_abort: AtomicBool,
    hard_abort: AtomicBool,
    paused: AtomicBool,
}

/// Shared timeout/cancellation state for one computer.
///
/// Cheaply cloneable; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct TimeoutState {
    inner: Arc<TimeoutInner>,
}

impl TimeoutState {
    pub fn new(timeout: Duration, abort_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TimeoutInner {
                timeout,
                abort_timeout,
                timer: Mutex::new(Timer::default()),
                soft_abort: AtomicBool::new(false),
                hard_abort: AtomicBool::new(false),
                paused: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &ComputerConfig) -> Self {
        Self::new(config.timeout(), config.abort_timeout())
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Timer> {
        match self.inner.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Begin a fresh running stretch, clearing any previous abort.
    pub fn start_timer(&self) {
        let mut timer = self.timer();
        timer.started = Some(Instant::now());
        timer.banked = Duration::ZERO;
        self.inner.soft_abort.store(false, Ordering::Release);
        self.inner.hard_abort.store(false, Ordering::Release);
        self.inner.paused.store(false, Ordering::Release);
    }

    /// Suspend the clock, e.g. while the engine waits on the host.
    pub fn pause_timer(&self) {
        let mut timer = self.timer();
        if let Some(started) = timer.started.take() {
            timer.banked += started.elapsed();
        }
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume_timer(&self) {
        let mut timer = self.timer();
        if timer.started.is_none() {
            timer.started = Some(Instant::now());
        }
        self.inner.paused.store(false, Ordering::Release);
    }

    /// Stop timing once the program yields.  Abort flags are kept until the
    /// next [`start_timer`](Self::start_timer).
    pub fn stop_timer(&self) {
        let mut timer = self.timer();
        timer.started = None;
        timer.banked = Duration::ZERO;
        self.inner.paused.store(false, Ordering::Release);
    }

    /// Time the program has been running in the current stretch.
    pub fn elapsed(&self) -> Duration {
        let timer = self.timer();
        timer.banked + timer.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Recompute the abort flags from the elapsed time.
    pub fn refresh(&self) {
        let elapsed = self.elapsed();
        if elapsed >= self.inner.timeout {
            self.inner.soft_abort.store(true, Ordering::Release);
        }
        if elapsed >= self.inner.timeout + self.inner.abort_timeout {
            self.inner.hard_abort.store(true, Ordering::Release);
        }
    }

    /// Abort immediately, e.g. because the computer is shutting down.
    pub fn hard_abort(&self) {
        self.inner.soft_abort.store(true, Ordering::Release);
        self.inner.hard_abort.store(true, Ordering::Release);
        tracing::debug!("computer hard-aborted");
    }

    pub fn is_soft_aborted(&self) -> bool {
        self.inner.soft_abort.load(Ordering::Acquire)
    }

    pub fn is_hard_aborted(&self) -> bool {
        self.inner.hard_abort.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Refresh, then fail if the program should stop.
    ///
    /// Host loops that may run for a long time call this once per
    /// iteration.
    pub fn check(&self) -> Result<(), CapabilityError> {
        self.refresh();
        if self.is_soft_aborted() {
            return Err(CapabilityError::new(TIMEOUT_MESSAGE));
        }
        Ok(())
    }
}

impl Default for TimeoutState {
    fn default() -> Self {
        Self::from_config(&ComputerConfig::default())
    }
}
