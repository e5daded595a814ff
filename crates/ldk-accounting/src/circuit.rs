//! Circuit breaker for the external reasoning tier.
//!
//! Failures over a sliding window trip the breaker open; while open, the
//! router stays in L1-only mode and unmatched documents route to review.
//! The breaker half-opens after the cool-off and closes again on the first
//! success. All transitions take an explicit `now` so tests pin behavior.

/// Breaker state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { since_ms: i64 },
}

/// Sliding-window failure breaker.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    window_ms: i64,
    threshold: usize,
    cooloff_ms: i64,
    failures: Vec<i64>,
    state: BreakerState,
}

impl CircuitBreaker {
    pub fn new(window_s: u64, threshold: u32, cooloff_s: u64) -> Self {
        Self {
            window_ms: (window_s as i64) * 1_000,
            threshold: threshold.max(1) as usize,
            cooloff_ms: (cooloff_s as i64) * 1_000,
            failures: Vec::new(),
            state: BreakerState::Closed,
        }
    }

    /// `true` while calls must be short-circuited.
    pub fn is_open(&mut self, now_ms: i64) -> bool {
        match self.state {
            BreakerState::Closed => false,
            BreakerState::Open { since_ms } => {
                if now_ms - since_ms >= self.cooloff_ms {
                    // Half-open: allow the next call through; a failure
                    // re-opens, a success closes.
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn record_failure(&mut self, now_ms: i64) {
        self.failures.push(now_ms);
        self.failures
            .retain(|&t| now_ms - t <= self.window_ms);
        if self.failures.len() >= self.threshold {
            self.state = BreakerState::Open { since_ms: now_ms };
        }
    }

    pub fn record_success(&mut self, _now_ms: i64) {
        self.failures.clear();
        self.state = BreakerState::Closed;
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }
}
