//! Retry scheduling.

use chrono::{DateTime, Utc};
use queue_storage::QueueEntry;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap and additive random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// `min(base * 2^attempts, max)`, without jitter.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max.as_millis().min(u64::MAX as u128) as u64;
        let multiplier = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms))
    }

    /// Backoff for `attempts` with freshly drawn jitter.
    pub fn delay(&self, attempts: u32) -> Duration {
        self.base_delay(attempts) + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

/// What a flush pass should do with one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Failed or at the ceiling; never attempted automatically.
    Skip,
    /// Still backing off. Not a failure.
    NotDue { remaining: Duration },
    /// Attempt delivery now.
    Due,
}

/// Decide whether `entry` may be attempted at `now`.
///
/// An entry that was never attempted is always due. A `last_attempt` in the
/// future (clock moved backwards) counts as zero elapsed time.
pub fn check_eligibility(
    entry: &QueueEntry,
    now: DateTime<Utc>,
    max_retries: u32,
    policy: &BackoffPolicy,
) -> Eligibility {
    if entry.is_failed(max_retries) {
        return Eligibility::Skip;
    }

    let Some(last_attempt) = entry.last_attempt else {
        return Eligibility::Due;
    };

    let elapsed = now
        .signed_duration_since(last_attempt)
        .to_std()
        .unwrap_or(Duration::ZERO);
    let delay = policy.delay(entry.attempts);

    if elapsed < delay {
        Eligibility::NotDue {
            remaining: delay - elapsed,
        }
    } else {
        Eligibility::Due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_storage::EntryStatus;

    fn policy(jitter_ms: u64) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(1_000),
            Duration::from_millis(30_000),
            Duration::from_millis(jitter_ms),
        )
    }

    fn entry(attempts: u32, last_attempt: Option<DateTime<Utc>>) -> QueueEntry {
        let mut e = QueueEntry::new("m", "c", "u", "user", "hi", Utc::now());
        e.attempts = attempts;
        e.last_attempt = last_attempt;
        e
    }

    #[test]
    fn base_delay_doubles_and_caps() {
        let p = policy(0);
        assert_eq!(p.base_delay(0), Duration::from_millis(1_000));
        assert_eq!(p.base_delay(1), Duration::from_millis(2_000));
        assert_eq!(p.base_delay(2), Duration::from_millis(4_000));
        assert_eq!(p.base_delay(4), Duration::from_millis(16_000));
        assert_eq!(p.base_delay(5), Duration::from_millis(30_000));
        assert_eq!(p.base_delay(64), Duration::from_millis(30_000));
        assert_eq!(p.base_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn delay_is_monotone_modulo_jitter() {
        let p = policy(500);
        for attempts in 0..10 {
            let d = p.delay(attempts);
            assert!(d >= p.base_delay(attempts));
            assert!(d < p.base_delay(attempts) + Duration::from_millis(500));
            assert!(p.base_delay(attempts + 1) >= p.base_delay(attempts));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let p = policy(0);
        assert_eq!(p.delay(3), Duration::from_millis(8_000));
    }

    #[test]
    fn never_attempted_is_due() {
        assert_eq!(
            check_eligibility(&entry(0, None), Utc::now(), 5, &policy(500)),
            Eligibility::Due
        );
    }

    #[test]
    fn recent_failure_is_not_due() {
        let now = Utc::now();
        let e = entry(1, Some(now - chrono::Duration::milliseconds(500)));
        match check_eligibility(&e, now, 5, &policy(0)) {
            Eligibility::NotDue { remaining } => {
                assert_eq!(remaining, Duration::from_millis(1_500))
            }
            other => panic!("expected NotDue, got {other:?}"),
        }
    }

    #[test]
    fn elapsed_backoff_is_due() {
        let now = Utc::now();
        let e = entry(2, Some(now - chrono::Duration::milliseconds(4_500)));
        assert_eq!(check_eligibility(&e, now, 5, &policy(500)), Eligibility::Due);
    }

    #[test]
    fn future_last_attempt_is_not_due() {
        let now = Utc::now();
        let e = entry(0, Some(now + chrono::Duration::seconds(10)));
        assert!(matches!(
            check_eligibility(&e, now, 5, &policy(0)),
            Eligibility::NotDue { .. }
        ));
    }

    #[test]
    fn failed_entries_are_skipped() {
        let now = Utc::now();
        assert_eq!(
            check_eligibility(&entry(5, None), now, 5, &policy(0)),
            Eligibility::Skip
        );

        let mut marked = entry(0, None);
        marked.status = Some(EntryStatus::Failed);
        assert_eq!(check_eligibility(&marked, now, 5, &policy(0)), Eligibility::Skip);
    }
}
