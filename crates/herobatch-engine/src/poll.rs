use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

/// Answer from one check of a remote state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    Done(T),
    Waiting(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last_state: String,
    },
}

/// Exponential backoff with a ceiling on total waiting time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_elapsed: Duration,
}

impl PollPolicy {
    pub fn asset_processing() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }

    pub fn batch_job() -> Self {
        Self {
            initial_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(5 * 60),
            multiplier: 1.5,
            max_elapsed: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// No sleeping between checks; waits end only on `Done` or the ceiling.
    pub fn immediate(max_elapsed: Duration) -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 1.0,
            max_elapsed,
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        if self.max_interval < interval {
            self.max_interval = interval;
        }
        self
    }

    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.multiplier.max(1.0))
            .min(self.max_interval)
    }

    /// Calls `check` until it reports `Done`, sleeping between attempts.
    ///
    /// The check receives the zero-based attempt number. Check errors end the
    /// wait immediately.
    pub fn wait<T>(&self, mut check: impl FnMut(u32) -> Result<PollStep<T>>) -> Result<PollOutcome<T>> {
        let started = Instant::now();
        let mut interval = self.initial_interval;
        let mut attempt = 0u32;
        loop {
            let last_state = match check(attempt)? {
                PollStep::Done(value) => return Ok(PollOutcome::Ready(value)),
                PollStep::Waiting(state) => state,
            };
            let elapsed = started.elapsed();
            if elapsed >= self.max_elapsed {
                return Ok(PollOutcome::TimedOut {
                    attempts: attempt + 1,
                    elapsed,
                    last_state,
                });
            }
            thread::sleep(interval.min(self.max_elapsed - elapsed));
            interval = self.next_interval(interval);
            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{PollOutcome, PollPolicy, PollStep};

    #[test]
    fn backoff_grows_and_caps() {
        let policy = PollPolicy {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(60),
        };
        let second = policy.next_interval(policy.initial_interval);
        let third = policy.next_interval(second);
        let fourth = policy.next_interval(third);
        assert_eq!(second, Duration::from_secs(2));
        assert_eq!(third, Duration::from_secs(4));
        assert_eq!(fourth, Duration::from_secs(5));
    }

    #[test]
    fn wait_returns_once_done() -> anyhow::Result<()> {
        let policy = PollPolicy::immediate(Duration::from_secs(30));
        let outcome = policy.wait(|attempt| {
            Ok(if attempt < 3 {
                PollStep::Waiting("RUNNING".to_string())
            } else {
                PollStep::Done(attempt)
            })
        })?;
        assert_eq!(outcome, PollOutcome::Ready(3));
        Ok(())
    }

    #[test]
    fn wait_times_out_at_ceiling() -> anyhow::Result<()> {
        let policy = PollPolicy::immediate(Duration::ZERO);
        let outcome = policy.wait(|_| Ok(PollStep::<()>::Waiting("PROCESSING".to_string())))?;
        match outcome {
            PollOutcome::TimedOut {
                attempts,
                last_state,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(last_state, "PROCESSING");
            }
            PollOutcome::Ready(()) => panic!("expected timeout"),
        }
        Ok(())
    }

    #[test]
    fn check_errors_propagate() {
        let policy = PollPolicy::immediate(Duration::from_secs(30));
        let result = policy.wait(|_| -> anyhow::Result<PollStep<()>> { anyhow::bail!("boom") });
        assert!(result.is_err());
    }
}
