//! Bounded exponential backoff and failure classification.
//!
//! Kept free of I/O so the policy can be checked on its own.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::CheckoutConfig;

/// Retry budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before retry 0; doubles for each following retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl From<&CheckoutConfig> for RetryPolicy {
    fn from(config: &CheckoutConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^retry_count`, saturating instead of overflowing.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether another retry may be scheduled after `retry_count` retries.
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Total attempts this policy allows, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

fn transient_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)database|timeout|temporary|try again")
            .expect("transient keyword pattern is a valid regex")
    })
}

/// Classify a server-reported failure message.
///
/// The backend does not send a structured retry flag, so the message is
/// matched case-insensitively against "database", "timeout", "temporary"
/// and "try again". Anything else, including a missing message, is
/// permanent.
pub fn classify_message(message: Option<&str>) -> FailureKind {
    match message {
        Some(text) if transient_pattern().is_match(text) => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_from_base() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (0..5).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 32000]);
    }

    #[test]
    fn delay_saturates_on_huge_counts() {
        let policy = RetryPolicy::default();
        assert!(policy.delay(64) >= policy.delay(31));
    }

    #[test]
    fn budget_boundaries() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(4));
        assert!(!policy.can_retry(5));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[test]
    fn policy_from_config() {
        let config = CheckoutConfig {
            max_retries: 2,
            base_delay_ms: 500,
            identity_wait_ms: 1000,
            ..Default::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
    }

    #[test]
    fn transient_keywords_match_case_insensitively() {
        for msg in [
            "Database unavailable",
            "upstream TIMEOUT",
            "Temporary failure in name resolution",
            "Something went wrong, please Try Again",
        ] {
            assert_eq!(classify_message(Some(msg)), FailureKind::Transient, "{msg}");
        }
    }

    #[test]
    fn other_messages_are_permanent() {
        assert_eq!(
            classify_message(Some("Checkout session not paid")),
            FailureKind::Permanent
        );
        assert_eq!(classify_message(Some("")), FailureKind::Permanent);
        assert_eq!(classify_message(None), FailureKind::Permanent);
    }
}
