use chrono::{DateTime, Duration, Utc};
use innkeep_store::app_config::SyncConfig;

/// Retry timing for the sync failure queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay_seconds: u64,
    pub base: u32,
    pub unit_seconds: u64,
    pub max_seconds: u64,
}

impl BackoffPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_delay_seconds: config.initial_retry_delay_seconds,
            base: config.backoff_base,
            unit_seconds: config.backoff_unit_seconds,
            max_seconds: config.max_backoff_seconds,
        }
    }

    pub fn first_retry_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + seconds(self.initial_delay_seconds)
    }

    /// `min(base^retry_count * unit, max)`, saturating on overflow.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let secs = u64::from(self.base)
            .checked_pow(retry_count)
            .and_then(|factor| factor.checked_mul(self.unit_seconds))
            .map_or(self.max_seconds, |d| d.min(self.max_seconds));
        seconds(secs)
    }

    pub fn next_retry_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        now + self.delay_for(retry_count)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 60,
            base: 2,
            unit_seconds: 60,
            max_seconds: 3600,
        }
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_then_caps() {
        let policy = BackoffPolicy::default();
        let delays: Vec<i64> = (1..=8).map(|n| policy.delay_for(n).num_seconds()).collect();
        assert_eq!(delays, vec![120, 240, 480, 960, 1920, 3600, 3600, 3600]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_huge_exponent_saturates_at_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(200).num_seconds(), 3600);
    }

    #[test]
    fn test_first_retry_uses_initial_delay() {
        let now = Utc::now();
        let policy = BackoffPolicy {
            initial_delay_seconds: 30,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.first_retry_at(now), now + Duration::seconds(30));
    }
}
