//! The outcome of one admission check and its HTTP projections.

use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::Serialize;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_REFILL_RATE: HeaderName = HeaderName::from_static("x-ratelimit-refillrate");

const REJECTION_FALLBACK: &str =
    r#"{"error":"RATE_LIMIT_ERROR","code":"RATE_LIMIT_EXCEEDED","message":"Rate limit exceeded. Please try again later."}"#;

/// Admit or deny, with the bucket numbers reported to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Tokens left after this call. Equals `capacity` on fail-open.
    pub remaining: u64,
    pub capacity: u64,
    /// Tokens restored per second.
    pub refill_rate: f64,
    /// When the next whole token accrues.
    pub next_refill_at: DateTime<Utc>,
    /// The store could not be consulted; the request was let through unchecked.
    pub fail_open: bool,
}

impl Decision {
    /// Convert unix millis into a timestamp, saturating at chrono's range.
    pub fn timestamp_from_millis(ms: u64) -> DateTime<Utc> {
        let ms = i64::try_from(ms).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Whole seconds until the next token, rounded up. Zero if already due.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = (self.next_refill_at - now).num_milliseconds();
        if ms <= 0 {
            0
        } else {
            (ms as u64).div_ceil(1000)
        }
    }

    /// Write the `X-RateLimit-*` headers. Existing values are replaced.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.capacity));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.next_refill_at.timestamp()));
        if let Ok(rate) = HeaderValue::from_str(&format!("{:.2}", self.refill_rate)) {
            headers.insert(X_RATELIMIT_REFILL_RATE, rate);
        }
    }

    /// Like [`apply_headers`](Self::apply_headers), plus `Retry-After` for denials.
    pub fn apply_rejection_headers(&self, headers: &mut HeaderMap, now: DateTime<Utc>) {
        self.apply_headers(headers);
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs(now)));
    }

    /// The 429 payload.
    pub fn rejection(&self) -> Rejection {
        Rejection {
            error: "RATE_LIMIT_ERROR",
            code: "RATE_LIMIT_EXCEEDED",
            message: "Rate limit exceeded. Please try again later.",
            details: RejectionDetails {
                remaining_tokens: self.remaining,
                next_refill: self.next_refill_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                capacity: self.capacity,
                refill_rate: self.refill_rate,
            },
        }
    }

    /// The 429 payload as JSON text.
    pub fn rejection_json(&self) -> String {
        serde_json::to_string(&self.rejection()).unwrap_or_else(|_| REJECTION_FALLBACK.to_string())
    }
}

/// JSON body of a rate-limited response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub error: &'static str,
    pub code: &'static str,
    pub message: &'static str,
    pub details: RejectionDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectionDetails {
    pub remaining_tokens: u64,
    /// RFC 3339 timestamp.
    pub next_refill: String,
    pub capacity: u64,
    pub refill_rate: f64,
}
