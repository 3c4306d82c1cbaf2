use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct HealthState {
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
}

/// Failure record of a single endpoint, shared by concurrent calls.
///
/// Failing endpoints are put into exponential back-off. The chain still
/// tries them, but only after all healthy endpoints.
#[derive(Debug, Default)]
pub struct ProviderHealth {
    state: Mutex<HealthState>,
}

impl ProviderHealth {
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.backoff_until = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let exponent = (state.consecutive_failures - 1).min(6);
        let backoff = BACKOFF_BASE.saturating_mul(1 << exponent).min(BACKOFF_MAX);
        state.backoff_until = Some(Instant::now() + backoff);
    }

    pub fn is_backing_off(&self) -> bool {
        self.state
            .lock()
            .backoff_until
            .map(|until| Instant::now() < until)
            .unwrap_or_default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }
}
