//! Rate-limit retry hints from response headers.

use std::time::Duration;

use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::client::{header_get, Headers};

/// Parse the wait the provider asked for: `Retry-After` (seconds or
/// HTTP-date), `X-RateLimit-Reset-After` (seconds) or `X-RateLimit-Reset`
/// (epoch seconds). `None` when no header carries a usable value.
pub fn parse_retry_hint(headers: &Headers) -> Option<Duration> {
    if let Some(value) = header_get(headers, "retry-after") {
        if let Some(d) = parse_seconds(value) {
            return Some(d);
        }
        if let Ok(at) = OffsetDateTime::parse(value.trim(), &Rfc2822) {
            return Some(until(at));
        }
    }
    if let Some(value) = header_get(headers, "x-ratelimit-reset-after") {
        if let Some(d) = parse_seconds(value) {
            return Some(d);
        }
    }
    if let Some(value) = header_get(headers, "x-ratelimit-reset") {
        if let Ok(epoch) = value.trim().parse::<i64>() {
            if let Ok(at) = OffsetDateTime::from_unix_timestamp(epoch) {
                return Some(until(at));
            }
        }
    }
    None
}

fn parse_seconds(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn until(at: OffsetDateTime) -> Duration {
    let now = OffsetDateTime::now_utc();
    if at <= now {
        Duration::ZERO
    } else {
        (at - now).try_into().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_retry_after_seconds() {
        let h = headers(&[("Retry-After", "3")]);
        assert_eq!(parse_retry_hint(&h), Some(Duration::from_secs(3)));
    }

    #[test]
    fn parses_reset_after_fractional_seconds() {
        let h = headers(&[("X-RateLimit-Reset-After", "1.5")]);
        assert_eq!(parse_retry_hint(&h), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn parses_http_date() {
        let future = OffsetDateTime::now_utc() + Duration::from_secs(30);
        let formatted = future.format(&Rfc2822).unwrap();
        let h = headers(&[("Retry-After", formatted.as_str())]);
        let hint = parse_retry_hint(&h).unwrap();
        assert!(hint <= Duration::from_secs(30));
        assert!(hint >= Duration::from_secs(25));
    }

    #[test]
    fn parses_epoch_reset() {
        let epoch = (OffsetDateTime::now_utc() + Duration::from_secs(10)).unix_timestamp();
        let h = headers(&[("X-RateLimit-Reset", epoch.to_string().as_str())]);
        let hint = parse_retry_hint(&h).unwrap();
        assert!(hint <= Duration::from_secs(10));
    }

    #[test]
    fn garbage_yields_none() {
        let h = headers(&[("Retry-After", "soon-ish")]);
        assert_eq!(parse_retry_hint(&h), None);
        assert_eq!(parse_retry_hint(&headers(&[])), None);
    }
}
