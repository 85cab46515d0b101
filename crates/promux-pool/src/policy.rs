//! Fallback policy: a pure function of status, error body and the current
//! backoff level. Cooldowns are advisory; eligibility is re-computed from
//! wall-clock timestamps at selection time.

use std::time::Duration;

/// Per-model lock applied when a multi-bucket provider returns 429 and no
/// retry hint is available.
pub const MODEL_LOCK_DEFAULT: Duration = Duration::from_secs(5 * 60);
/// Retry hint surfaced when every connection is excluded only per-model.
pub const MODEL_LOCK_RETRY_SECS: u64 = 60;

const RATE_LIMIT_BASE_SECS: u64 = 60;
const RATE_LIMIT_CAP_SECS: u64 = 60 * 60;
const AUTH_COOLDOWN_SECS: u64 = 60;
const QUOTA_COOLDOWN_SECS: u64 = 24 * 60 * 60;
const UPSTREAM_5XX_COOLDOWN_SECS: u64 = 30;
const NETWORK_COOLDOWN_SECS: u64 = 15;

/// Error-body fragments that mean "rate limited" no matter the status code.
const RATE_LIMIT_TOKENS: [&str; 4] = ["rate limit", "quota", "insufficient_quota", "unavailable"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDecision {
    /// Whether the pipeline should hop to the next credential.
    pub fallback: bool,
    pub cooldown: Duration,
    pub next_backoff_level: u32,
    /// Status after token-based reclassification (429 for quota-ish bodies).
    pub effective_status: Option<u16>,
}

pub fn classify_failure(
    status: Option<u16>,
    error_text: &str,
    backoff_level: u32,
) -> FailureDecision {
    let Some(status) = status else {
        return FailureDecision {
            fallback: true,
            cooldown: Duration::from_secs(NETWORK_COOLDOWN_SECS),
            next_backoff_level: backoff_level + 1,
            effective_status: None,
        };
    };

    let lowered = error_text.to_ascii_lowercase();
    let quota_ish = RATE_LIMIT_TOKENS.iter().any(|t| lowered.contains(t));
    if status == 429 || quota_ish {
        let factor = 1u64 << backoff_level.min(16);
        let secs = (RATE_LIMIT_BASE_SECS.saturating_mul(factor)).min(RATE_LIMIT_CAP_SECS);
        return FailureDecision {
            fallback: true,
            cooldown: Duration::from_secs(secs),
            next_backoff_level: backoff_level + 1,
            effective_status: Some(429),
        };
    }

    match status {
        401 | 403 => FailureDecision {
            fallback: true,
            cooldown: Duration::from_secs(AUTH_COOLDOWN_SECS),
            next_backoff_level: backoff_level + 1,
            effective_status: Some(status),
        },
        402 => FailureDecision {
            fallback: true,
            cooldown: Duration::from_secs(QUOTA_COOLDOWN_SECS),
            next_backoff_level: backoff_level + 1,
            effective_status: Some(status),
        },
        500..=599 => FailureDecision {
            fallback: true,
            cooldown: Duration::from_secs(UPSTREAM_5XX_COOLDOWN_SECS),
            next_backoff_level: backoff_level + 1,
            effective_status: Some(status),
        },
        other => FailureDecision {
            fallback: false,
            cooldown: Duration::ZERO,
            next_backoff_level: backoff_level,
            effective_status: Some(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_cooldown_doubles_and_caps() {
        assert_eq!(
            classify_failure(Some(429), "", 0).cooldown,
            Duration::from_secs(60)
        );
        assert_eq!(
            classify_failure(Some(429), "", 3).cooldown,
            Duration::from_secs(480)
        );
        assert_eq!(
            classify_failure(Some(429), "", 12).cooldown,
            Duration::from_secs(3600)
        );
        assert_eq!(classify_failure(Some(429), "", 2).next_backoff_level, 3);
    }

    #[test]
    fn quota_body_reclassifies_as_rate_limit() {
        let decision = classify_failure(Some(500), "insufficient_quota for this key", 0);
        assert_eq!(decision.effective_status, Some(429));
        assert!(decision.fallback);
        assert_eq!(decision.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn auth_quota_and_5xx_cooldowns() {
        assert_eq!(
            classify_failure(Some(401), "", 0).cooldown,
            Duration::from_secs(60)
        );
        assert_eq!(
            classify_failure(Some(402), "", 0).cooldown,
            Duration::from_secs(86_400)
        );
        assert_eq!(
            classify_failure(Some(503), "oops", 0).cooldown,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn other_4xx_surfaces_to_client() {
        let decision = classify_failure(Some(400), "bad request", 2);
        assert!(!decision.fallback);
        assert_eq!(decision.next_backoff_level, 2);
    }

    #[test]
    fn network_error_is_retryable() {
        let decision = classify_failure(None, "connection refused", 1);
        assert!(decision.fallback);
        assert_eq!(decision.cooldown, Duration::from_secs(15));
        assert_eq!(decision.effective_status, None);
    }
}
