//! Cache-Control interpretation for upstream responses.

use hyper::header::CACHE_CONTROL;
use hyper::{HeaderMap, Method, StatusCode};
use std::time::Duration;

/// Largest freshness lifetime honoured, in seconds. Larger delta-seconds
/// values are treated as this (RFC 9111 section 1.2.2).
pub const MAX_AGE_CEILING_SECS: u64 = 1 << 31;

/// What an upstream response allows the proxy to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirective {
    /// Must not be stored; any stored copy must be dropped.
    NoStore,
    /// Storable for exactly this long.
    MaxAge(Duration),
    /// No freshness information; the configured default applies.
    Unspecified,
}

impl CacheDirective {
    /// Parse every `Cache-Control` header value on a response.
    ///
    /// `no-store`, `no-cache` and `private` win over any age; `s-maxage`
    /// wins over `max-age`. Unknown tokens are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut max_age = None;
        let mut shared_max_age = None;

        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for token in value.split(',') {
                let token = token.trim().to_ascii_lowercase();
                let (name, arg) = match token.split_once('=') {
                    Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                    None => (token.as_str(), None),
                };
                match (name, arg) {
                    ("no-store" | "no-cache" | "private", _) => return CacheDirective::NoStore,
                    ("max-age", Some(secs)) => max_age = delta_seconds(secs).or(max_age),
                    ("s-maxage", Some(secs)) => {
                        shared_max_age = delta_seconds(secs).or(shared_max_age)
                    }
                    _ => {}
                }
            }
        }

        match shared_max_age.or(max_age) {
            Some(0) => CacheDirective::NoStore,
            Some(secs) => {
                CacheDirective::MaxAge(Duration::from_secs(secs.min(MAX_AGE_CEILING_SECS)))
            }
            None => CacheDirective::Unspecified,
        }
    }

    /// TTL to store with, or `None` if the response must not be stored.
    pub fn ttl(&self, default: Duration) -> Option<Duration> {
        match self {
            CacheDirective::NoStore => None,
            CacheDirective::MaxAge(ttl) => Some(*ttl),
            CacheDirective::Unspecified => Some(default),
        }
    }
}

/// Digits too long for u64 still mean "very long", not "absent".
fn delta_seconds(arg: &str) -> Option<u64> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(arg.parse::<u64>().unwrap_or(MAX_AGE_CEILING_SECS))
}

/// Only safe, body-idempotent reads are served from cache.
pub fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

pub fn is_cacheable_status(status: StatusCode) -> bool {
    status.is_success()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(values: &[&'static str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values {
            map.append(CACHE_CONTROL, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn parses_max_age() {
        assert_eq!(
            CacheDirective::from_headers(&headers(&["public, max-age=60"])),
            CacheDirective::MaxAge(Duration::from_secs(60))
        );
        assert_eq!(
            CacheDirective::from_headers(&headers(&["max-age=60, s-maxage=10"])),
            CacheDirective::MaxAge(Duration::from_secs(10))
        );
    }

    #[test]
    fn huge_ages_are_clamped() {
        let ceiling = CacheDirective::MaxAge(Duration::from_secs(MAX_AGE_CEILING_SECS));
        for value in ["max-age=18446744073709551615", "s-maxage=99999999999999999999999"] {
            assert_eq!(CacheDirective::from_headers(&headers(&[value])), ceiling, "{value}");
        }
    }

    #[test]
    fn no_store_variants() {
        for value in ["no-store", "private, max-age=60", "max-age=0", "No-Cache"] {
            assert_eq!(
                CacheDirective::from_headers(&headers(&[value])),
                CacheDirective::NoStore,
                "{value}"
            );
        }
        // Spread over several header lines.
        assert_eq!(
            CacheDirective::from_headers(&headers(&["max-age=60", "no-store"])),
            CacheDirective::NoStore
        );
    }

    #[test]
    fn missing_or_garbage_uses_default() {
        let default = Duration::from_secs(300);
        assert_eq!(CacheDirective::from_headers(&HeaderMap::new()).ttl(default), Some(default));
        assert_eq!(
            CacheDirective::from_headers(&headers(&["max-age=soon"])).ttl(default),
            Some(default)
        );
        assert_eq!(CacheDirective::NoStore.ttl(default), None);
    }

    #[test]
    fn cacheable_requests() {
        assert!(is_cacheable_method(&Method::GET));
        assert!(is_cacheable_method(&Method::HEAD));
        assert!(!is_cacheable_method(&Method::POST));
        assert!(is_cacheable_status(StatusCode::OK));
        assert!(!is_cacheable_status(StatusCode::NOT_FOUND));
    }
}
