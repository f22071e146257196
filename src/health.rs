use crate::error::UplinkError;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Default)]
struct HealthState {
    failed_requests: u32,
    last_request_time: Option<Instant>,
}

/// Per-uplink circuit breaker.
///
/// Counts consecutive failed attempts; once `max_fails` is reached the
/// uplink is considered offline for `fail_timeout` after the last issued
/// request, and preflight checks fail fast without touching the network.
/// The offline/back-online transition logs are emitted under the same lock
/// as the state change, so concurrent outcomes produce at most one
/// transition log per direction.
#[derive(Debug)]
pub struct HealthTracker {
    name: String,
    max_fails: u32,
    fail_timeout: Duration,
    state: Mutex<HealthState>,
}

impl HealthTracker {
    pub fn new(name: impl Into<String>, max_fails: u32, fail_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_fails: max_fails.max(1),
            fail_timeout,
            state: Mutex::new(HealthState::default()),
        }
    }

    /// Preflight check; `Offline` means no request must be issued.
    pub fn ensure_online(&self) -> Result<(), UplinkError> {
        if self.is_offline() {
            return Err(UplinkError::Offline {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn is_offline(&self) -> bool {
        let state = self.state.lock().expect("health lock");
        if state.failed_requests < self.max_fails {
            return false;
        }
        match state.last_request_time {
            Some(last) => last.elapsed() < self.fail_timeout,
            None => false,
        }
    }

    /// Stamps the issuance time of a request attempt.
    pub fn mark_request(&self) {
        let mut state = self.state.lock().expect("health lock");
        state.last_request_time = Some(Instant::now());
    }

    /// Records a healthy response (2xx). Resets the failure counter and,
    /// when the uplink had tripped, logs the recovery.
    pub fn on_success(&self) {
        let mut state = self.state.lock().expect("health lock");
        if state.failed_requests >= self.max_fails {
            warn!(uplink = self.name.as_str(), "uplink is back online");
        }
        state.failed_requests = 0;
    }

    /// Records a failed attempt (transport error or 5xx), including
    /// retry-internal attempts that never surface to the caller.
    pub fn on_failure(&self) {
        let mut state = self.state.lock().expect("health lock");
        state.failed_requests = state.failed_requests.saturating_add(1);
        if state.failed_requests == self.max_fails {
            warn!(
                uplink = self.name.as_str(),
                max_fails = self.max_fails,
                "uplink is now offline"
            );
        }
    }

    pub fn failed_requests(&self) -> u32 {
        self.state.lock().expect("health lock").failed_requests
    }
}
