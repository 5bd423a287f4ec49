use axum::http::{HeaderMap, HeaderValue, Method};

use crate::auth::AuthenticatedCaller;

/// Header carrying the client-chosen idempotency key. Header names are
/// case-insensitive, so `Idempotency-Key` and `IDEMPOTENCY-KEY` both match.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Longest key accepted, matching the `idempotency_keys.idempotency_key` column.
pub const MAX_KEY_LENGTH: usize = 255;

/// Why a request bypasses idempotency handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonMutatingMethod,
    MissingKey,
    InvalidKey,
    Anonymous,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NonMutatingMethod => "non_mutating_method",
            SkipReason::MissingKey => "missing_key",
            SkipReason::InvalidKey => "invalid_key",
            SkipReason::Anonymous => "anonymous",
        }
    }
}

/// Classifier verdict for one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Ineligible(SkipReason),
    Eligible { owner: String, key: String },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible { .. })
    }
}

/// Only POST and PUT are deduplicated. PATCH and DELETE always run.
pub fn is_mutating(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

/// Decides whether idempotency applies to a request and under which `(owner, key)`.
///
/// The owner always comes from the authenticated principal, never from the
/// request, so one caller cannot address another caller's cached outcomes.
pub fn classify(
    method: &Method,
    headers: &HeaderMap,
    caller: Option<&AuthenticatedCaller>,
) -> Eligibility {
    if !is_mutating(method) {
        return Eligibility::Ineligible(SkipReason::NonMutatingMethod);
    }

    let Some(raw_key) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Eligibility::Ineligible(SkipReason::MissingKey);
    };

    let Some(key) = normalize_client_key(raw_key) else {
        tracing::warn!("Ignoring malformed {} header", IDEMPOTENCY_KEY_HEADER);
        return Eligibility::Ineligible(SkipReason::InvalidKey);
    };

    let Some(caller) = caller else {
        return Eligibility::Ineligible(SkipReason::Anonymous);
    };

    Eligibility::Eligible {
        owner: caller.id.clone(),
        key,
    }
}

/// Trims and lower-cases a client key. Returns `None` for blank, non-ASCII or
/// over-long values.
pub fn normalize_client_key(raw: &HeaderValue) -> Option<String> {
    let value = raw.to_str().ok()?.trim();
    if value.is_empty() || value.len() > MAX_KEY_LENGTH {
        return None;
    }
    Some(value.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn caller(id: &str) -> AuthenticatedCaller {
        AuthenticatedCaller::new(id)
    }

    fn headers_with_key(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_post_with_key_and_caller_is_eligible() {
        let result = classify(&Method::POST, &headers_with_key("K1"), Some(&caller("user-1")));
        assert_eq!(
            result,
            Eligibility::Eligible {
                owner: "user-1".to_string(),
                key: "k1".to_string(),
            }
        );
    }

    #[test]
    fn test_put_is_eligible() {
        assert!(classify(&Method::PUT, &headers_with_key("k"), Some(&caller("u"))).is_eligible());
    }

    #[test]
    fn test_non_mutating_methods_are_ineligible() {
        for method in [Method::GET, Method::DELETE, Method::PATCH, Method::HEAD, Method::OPTIONS] {
            assert_eq!(
                classify(&method, &headers_with_key("k"), Some(&caller("u"))),
                Eligibility::Ineligible(SkipReason::NonMutatingMethod),
                "{} must not be deduplicated",
                method
            );
        }
    }

    #[test]
    fn test_missing_header_is_ineligible() {
        assert_eq!(
            classify(&Method::POST, &HeaderMap::new(), Some(&caller("u"))),
            Eligibility::Ineligible(SkipReason::MissingKey)
        );
    }

    #[test]
    fn test_anonymous_caller_is_ineligible() {
        assert_eq!(
            classify(&Method::POST, &headers_with_key("k"), None),
            Eligibility::Ineligible(SkipReason::Anonymous)
        );
    }

    #[test]
    fn test_blank_and_oversized_keys_are_rejected() {
        assert_eq!(normalize_client_key(&HeaderValue::from_static("   ")), None);
        let long = "a".repeat(MAX_KEY_LENGTH + 1);
        assert_eq!(normalize_client_key(&HeaderValue::from_str(&long).unwrap()), None);
        let max = "a".repeat(MAX_KEY_LENGTH);
        assert_eq!(normalize_client_key(&HeaderValue::from_str(&max).unwrap()), Some(max));
    }

    #[test]
    fn test_non_ascii_key_is_rejected() {
        let value = HeaderValue::from_bytes("clé".as_bytes()).unwrap();
        assert_eq!(normalize_client_key(&value), None);
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_static("idempotency-key"),
            HeaderValue::from_static("abc"),
        );
        let uppercase: axum::http::HeaderName = "IDEMPOTENCY-KEY".parse().unwrap();
        assert!(headers.get(uppercase).is_some());
        assert!(classify(&Method::POST, &headers, Some(&caller("u"))).is_eligible());
    }

    proptest! {
        #[test]
        fn prop_key_case_and_padding_normalize_to_same_slot(key in "[A-Za-z0-9_-]{1,64}") {
            let padded = format!("  {}  ", key.to_ascii_uppercase());
            let a = classify(&Method::POST, &headers_with_key(&key), Some(&caller("u")));
            let b = classify(&Method::POST, &headers_with_key(&padded), Some(&caller("u")));
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_owner_comes_from_caller(owner in "[a-z0-9-]{1,32}", key in "[a-z0-9]{1,32}") {
            match classify(&Method::POST, &headers_with_key(&key), Some(&caller(&owner))) {
                Eligibility::Eligible { owner: got, .. } => prop_assert_eq!(got, owner),
                other => prop_assert!(false, "expected eligible, got {:?}", other),
            }
        }
    }
}
