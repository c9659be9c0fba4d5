//! Retry policy: `(max_attempts, backoff_base, jitter) -> next_delay`.
//!
//! The policy is a value. It never sleeps and keeps no counters; callers
//! evaluate it against the attempt count stored on their own record.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `backoff_base` every time.
    Fixed,
    /// `backoff_base * attempt`.
    Linear,
    /// `backoff_base * 2^(attempt - 1)`.
    #[default]
    Exponential,
}

impl BackoffStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" | "constant" => Some(Self::Fixed),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }

    /// Multiplier applied to the base for the given attempt (1-indexed).
    fn factor(self, attempt: u32) -> f64 {
        match self {
            Self::Fixed => 1.0,
            Self::Linear => f64::from(attempt),
            Self::Exponential => 2_f64.powi(attempt.saturating_sub(1).min(62) as i32),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed in total, the first one included.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Upper bound on the un-jittered delay.
    pub backoff_cap: Duration,
    pub strategy: BackoffStrategy,
    /// Share of the delay, in [0, 1], that may be added or removed.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base: delay,
            backoff_cap: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Short and bounded: re-reads after a lost compare-and-swap.
    pub fn for_conflicts() -> Self {
        Self {
            max_attempts: 16,
            backoff_base: Duration::from_millis(2),
            backoff_cap: Duration::from_millis(100),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.5,
        }
    }

    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let ms = self.backoff_base.as_millis() as f64 * self.strategy.factor(attempt);
        Duration::from_millis(ms.min(self.backoff_cap.as_millis() as f64) as u64)
    }

    /// Delay before attempt `attempt + 1` of whatever `seed` names.
    ///
    /// The jitter is derived from `seed` and `attempt`, so two tasks failing
    /// together spread out while one task always gets the same delay.
    pub fn delay_for(&self, attempt: u32, seed: &str) -> Duration {
        let delay = self.backoff(attempt);
        let band = delay.as_millis() as f64 * self.jitter.clamp(0.0, 1.0);
        if band <= 0.0 {
            return delay;
        }
        let offset = band * (unit_interval(seed, attempt) * 2.0 - 1.0);
        Duration::from_millis((delay.as_millis() as f64 + offset).max(0.0) as u64)
    }
}

/// Uniform-ish value in [0, 1) from a hash of `seed` and `attempt`.
fn unit_interval(seed: &str, attempt: u32) -> f64 {
    let digest = Sha256::new()
        .chain_update(seed.as_bytes())
        .chain_update(attempt.to_be_bytes())
        .finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(strategy: BackoffStrategy, jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(10),
            strategy,
            jitter,
        }
    }

    #[test]
    fn strategies_scale_the_base() {
        let exp = policy(BackoffStrategy::Exponential, 0.0);
        let delays: Vec<_> = (1..=4).map(|a| exp.backoff(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);

        let linear = policy(BackoffStrategy::Linear, 0.0);
        assert_eq!(linear.backoff(3), Duration::from_millis(300));

        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for(1, "t"), Duration::from_millis(500));
        assert_eq!(fixed.delay_for(3, "t"), Duration::from_millis(500));
    }

    #[test]
    fn backoff_is_capped() {
        let exp = policy(BackoffStrategy::Exponential, 0.0);
        assert_eq!(exp.backoff(30), Duration::from_secs(10));
        assert_eq!(exp.backoff(0), Duration::ZERO);
    }

    #[test]
    fn attempts_stop_at_the_limit() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(0));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn jitter_depends_on_seed_not_on_call() {
        let p = policy(BackoffStrategy::Fixed, 0.5);
        assert_eq!(p.delay_for(2, "job-task-000001"), p.delay_for(2, "job-task-000001"));

        let spread: std::collections::HashSet<_> =
            (0..20).map(|i| p.delay_for(2, &format!("job-task-{i:06}"))).collect();
        assert!(spread.len() > 1);
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(BackoffStrategy::parse("constant"), Some(BackoffStrategy::Fixed));
        assert_eq!(BackoffStrategy::parse("linear"), Some(BackoffStrategy::Linear));
        assert_eq!(BackoffStrategy::parse("random"), None);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_in_band(
            attempt in 1u32..200,
            base_ms in 1u64..5_000,
            jitter in 0.0f64..1.0,
            seed in "[a-z0-9-]{1,24}",
        ) {
            let p = RetryPolicy {
                max_attempts: 10,
                backoff_base: Duration::from_millis(base_ms),
                backoff_cap: Duration::from_secs(60),
                strategy: BackoffStrategy::Exponential,
                jitter,
            };
            let center = p.backoff(attempt).as_millis() as f64;
            let delay = p.delay_for(attempt, &seed).as_millis() as f64;
            prop_assert!(delay <= center * (1.0 + jitter) + 1.0);
            prop_assert!(delay >= center * (1.0 - jitter) - 1.0);
        }
    }
}
