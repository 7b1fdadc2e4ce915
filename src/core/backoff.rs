
use serde::{Deserialize, Serialize};

/// Linear backoff with a cap, plus the circuit breaker that stops automatic retries.
///
/// Pure policy: the connection manager owns the state and asks this type what to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub step_delay_ms: u64,
    pub cap_delay_ms: u64,
    /// Consecutive failed attempts that trip the circuit.
    pub max_retries: u32,
    /// How long the circuit stays open, measured from the last attempt.
    pub cooldown_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            step_delay_ms: 1_000,
            cap_delay_ms: 30_000,
            max_retries: 5,
            cooldown_ms: 30_000,
        }
    }
}

/// Reconnect bookkeeping. Created zeroed at startup and kept for the whole session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub backoff_delay_ms: u64,
    pub circuit_open: bool,
    pub last_attempt_at_ms: u64,
}

/// Answer to "a connection attempt just failed / is about to start".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay_ms: u64,
    pub circuit_open: bool,
}

impl BackoffPolicy {
    /// Clamp degenerate values: at least one retry, cap never below base.
    pub fn normalized(self) -> Self {
        Self {
            max_retries: self.max_retries.max(1),
            cap_delay_ms: self.cap_delay_ms.max(self.base_delay_ms),
            ..self
        }
    }

    /// `min(base + attempt * step, cap)`; non-decreasing in `attempt`.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_add(self.step_delay_ms.saturating_mul(u64::from(attempt)))
            .min(self.cap_delay_ms.max(self.base_delay_ms))
    }

    pub fn cooldown_remaining(&self, last_attempt_at_ms: u64, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(last_attempt_at_ms);
        self.cooldown_ms.saturating_sub(elapsed)
    }

    /// Decide from `(attempt_count, last_attempt_at_ms, now)` and the current circuit flag.
    ///
    /// - circuit open and cooldown running: no retry, `delay_ms` is the time left.
    /// - circuit open and cooldown elapsed: the circuit closes for one more attempt.
    /// - `attempt_count >= max_retries` with the circuit closed: trip it.
    pub fn decide(
        &self,
        attempt_count: u32,
        last_attempt_at_ms: u64,
        circuit_open: bool,
        now_ms: u64,
    ) -> RetryDecision {
        if circuit_open {
            let remaining = self.cooldown_remaining(last_attempt_at_ms, now_ms);
            if remaining > 0 {
                return RetryDecision {
                    should_retry: false,
                    delay_ms: remaining,
                    circuit_open: true,
                };
            }
            return RetryDecision {
                should_retry: true,
                delay_ms: self.delay_for(attempt_count),
                circuit_open: false,
            };
        }

        if attempt_count >= self.max_retries.max(1) {
            return RetryDecision {
                should_retry: false,
                delay_ms: self.delay_for(attempt_count),
                circuit_open: true,
            };
        }

        RetryDecision {
            should_retry: true,
            delay_ms: self.delay_for(attempt_count),
            circuit_open: false,
        }
    }

    /// Policy view of a state snapshot.
    pub fn decide_for(&self, state: &ReconnectState, now_ms: u64) -> RetryDecision {
        self.decide(
            state.attempt_count,
            state.last_attempt_at_ms,
            state.circuit_open,
            now_ms,
        )
    }
}

impl ReconnectState {
    /// Transition into Open: attempts forgotten, delay back to base.
    pub fn reset_on_open(&mut self, policy: &BackoffPolicy) {
        self.attempt_count = 0;
        self.backoff_delay_ms = policy.base_delay_ms;
        self.circuit_open = false;
    }

    /// `forceReconnect()`: unconditional reset of breaker and backoff.
    pub fn force_reset(&mut self, policy: &BackoffPolicy) {
        self.reset_on_open(policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay_ms: 1_000,
            step_delay_ms: 500,
            cap_delay_ms: 4_000,
            max_retries: 5,
            cooldown_ms: 30_000,
        }
    }

    #[test]
    fn delay_grows_monotonically_up_to_cap() {
        let policy = policy();
        let delays: Vec<u64> = (0..20).map(|a| policy.delay_for(a)).collect();
        assert_eq!(delays[1], 1_500);
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "delay decreased: {pair:?}");
        }
        assert!(delays.iter().all(|d| *d <= 4_000));
        assert_eq!(*delays.last().unwrap(), 4_000);
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = BackoffPolicy {
            base_delay_ms: u64::MAX - 1,
            step_delay_ms: u64::MAX,
            cap_delay_ms: u64::MAX,
            ..policy()
        };
        assert_eq!(policy.delay_for(u32::MAX), u64::MAX);
    }

    #[test]
    fn trips_circuit_at_max_retries() {
        let policy = policy();
        for attempt in 1..5 {
            let decision = policy.decide(attempt, 0, false, 0);
            assert!(decision.should_retry);
            assert!(!decision.circuit_open);
        }
        let tripped = policy.decide(5, 0, false, 0);
        assert!(!tripped.should_retry);
        assert!(tripped.circuit_open);
    }

    #[test]
    fn open_circuit_blocks_until_cooldown_elapses() {
        let policy = policy();
        let blocked = policy.decide(5, 10_000, true, 25_000);
        assert!(!blocked.should_retry);
        assert!(blocked.circuit_open);
        assert_eq!(blocked.delay_ms, 15_000);

        let released = policy.decide(5, 10_000, true, 40_000);
        assert!(released.should_retry);
        assert!(!released.circuit_open);
    }

    #[test]
    fn normalized_enforces_minimums() {
        let policy = BackoffPolicy {
            base_delay_ms: 2_000,
            cap_delay_ms: 100,
            max_retries: 0,
            ..policy()
        }
        .normalized();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.cap_delay_ms, 2_000);
        assert_eq!(policy.delay_for(3), 2_000);
    }

    #[test]
    fn reset_on_open_restores_base_delay() {
        let policy = policy();
        let mut state = ReconnectState {
            attempt_count: 4,
            backoff_delay_ms: 3_000,
            circuit_open: true,
            last_attempt_at_ms: 99,
        };
        state.reset_on_open(&policy);
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.backoff_delay_ms, 1_000);
        assert!(!state.circuit_open);
        assert_eq!(state.last_attempt_at_ms, 99);
    }
}
