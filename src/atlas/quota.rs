//! Classification of platform rejections.
//!
//! A 429 status is the structured quota signal. Older platform versions
//! report spent quota as a 400/403 with a prose explanation, so the body is
//! also matched against [`LEGACY_QUOTA_PATTERN`]. The wording is provider
//! specific and only a heuristic.

use std::sync::OnceLock;

use regex::Regex;

use super::AtlasError;

/// Body wording that older platform versions use for a spent quota.
pub const LEGACY_QUOTA_PATTERN: &str =
    r"(?i)(quota|not enough credits|too many (concurrent )?measurements|(daily|rate|request) limit)";

static LEGACY_QUOTA: OnceLock<Option<Regex>> = OnceLock::new();

fn legacy_quota_regex() -> Option<&'static Regex> {
    LEGACY_QUOTA
        .get_or_init(|| Regex::new(LEGACY_QUOTA_PATTERN).ok())
        .as_ref()
}

/// Map a non-success HTTP reply to an [`AtlasError`].
pub fn classify_failure(status: u16, body: &str) -> AtlasError {
    if status == 429 {
        return AtlasError::QuotaExceeded(summarize(body));
    }

    let legacy_match = (status == 400 || status == 403)
        && legacy_quota_regex().is_some_and(|re| re.is_match(body));
    if legacy_match {
        tracing::debug!("Quota detected from response wording (status {})", status);
        return AtlasError::QuotaExceeded(summarize(body));
    }

    AtlasError::Request {
        status,
        body: summarize(body),
    }
}

fn summarize(body: &str) -> String {
    const MAX: usize = 300;
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX {
        flat
    } else {
        flat.chars().take(MAX).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_quota() {
        assert!(classify_failure(429, "").is_quota_exceeded());
    }

    #[test]
    fn test_legacy_wording_is_quota() {
        let body = r#"{"error": {"status": 403, "detail": "Daily limit of measurements reached"}}"#;
        assert!(classify_failure(403, body).is_quota_exceeded());

        let body = r#"{"error": {"detail": "You do not have enough credits: not enough credits"}}"#;
        assert!(classify_failure(400, body).is_quota_exceeded());
    }

    #[test]
    fn test_other_failures_are_requests() {
        let err = classify_failure(400, r#"{"error": {"detail": "Invalid target"}}"#);
        assert!(matches!(err, AtlasError::Request { status: 400, .. }));

        // Wording only counts on client-error statuses.
        let err = classify_failure(500, "quota service unavailable");
        assert!(matches!(err, AtlasError::Request { status: 500, .. }));
    }

    #[test]
    fn test_body_is_flattened_and_bounded() {
        let long = "word\n".repeat(200);
        match classify_failure(404, &long) {
            AtlasError::Request { body, .. } => {
                assert!(!body.contains('\n'));
                assert_eq!(body.chars().count(), 300);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
