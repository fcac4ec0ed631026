//! Sliding-log admission control for outbound source calls.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Delays callers so that no more than `max_requests` admissions land in any
/// trailing `window`. Bursts are smoothed rather than reset at period
/// boundaries, which is what most provider rate limits actually measure.
///
/// `max_requests == 0` would wait forever; the config layer rejects it
/// before a controller is ever built.
pub struct AdmissionController {
    max_requests: usize,
    window: Duration,
    log: Mutex<VecDeque<Instant>>,
}

impl AdmissionController {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        debug_assert!(max_requests > 0, "validated at configuration time");
        Self {
            max_requests: max_requests as usize,
            window,
            log: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until a new call may proceed, then record its admission.
    ///
    /// The lock is released while sleeping so concurrent callers queue on
    /// the log rather than on each other's waits; the window is re-checked
    /// after every sleep.
    pub async fn admit(&self) {
        loop {
            let wait = {
                let mut log = self.log.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = log.front() {
                    if now.duration_since(oldest) >= self.window {
                        log.pop_front();
                    } else {
                        break;
                    }
                }
                if log.len() < self.max_requests {
                    log.push_back(now);
                    return;
                }
                let oldest = *log.front().unwrap_or(&now);
                self.window.saturating_sub(now.duration_since(oldest))
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Admissions currently inside the trailing window.
    pub async fn in_flight(&self) -> usize {
        let mut log = self.log.lock().await;
        let now = Instant::now();
        while let Some(&oldest) = log.front() {
            if now.duration_since(oldest) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }
        log.len()
    }
}
