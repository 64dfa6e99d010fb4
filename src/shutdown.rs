use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Why the completion flag was raised. The first reason recorded wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every queued file has been claimed
    Completed,
    /// Too many consecutive rate-limited responses
    RateLimited,
    /// Fetching or health-checking a replacement proxy failed
    RotationFailed(String),
    /// Ctrl-C or SIGTERM
    Signal,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => write!(f, "all files processed"),
            StopReason::RateLimited => write!(f, "halted after repeated rate limiting"),
            StopReason::RotationFailed(e) => write!(f, "halted, proxy rotation failed: {e}"),
            StopReason::Signal => write!(f, "interrupted by signal"),
        }
    }
}

/// Process-wide cancellation token shared by workers and background loops
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason);
        }
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sleep for `duration`, waking early once the flag is raised.
    /// Returns `false` if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
