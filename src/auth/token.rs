use axum::http::{HeaderMap, header};

/// Primary credential header
pub const API_KEY_HEADER: &str = "x-api-key";

/// Schemes accepted in the `Authorization` fallback
const AUTHORIZATION_SCHEMES: [&str; 2] = ["Bearer", "ApiKey"];

/// Extracts the presented API key from request headers
pub struct ApiKeyExtractor;

impl ApiKeyExtractor {
    /// Read `X-API-Key`, falling back to `Authorization: Bearer <key>` or
    /// `Authorization: ApiKey <key>`.
    ///
    /// Returns `None` when neither header carries a non-empty key.
    pub fn from_headers(headers: &HeaderMap) -> Option<String> {
        Self::from_api_key_header(headers).or_else(|| Self::from_authorization(headers))
    }

    fn from_api_key_header(headers: &HeaderMap) -> Option<String> {
        headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    fn from_authorization(headers: &HeaderMap) -> Option<String> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, key) = value.split_once(' ')?;

        if !AUTHORIZATION_SCHEMES
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(scheme))
        {
            return None;
        }

        let key = key.trim();
        (!key.is_empty()).then(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn reads_x_api_key() {
        let map = headers(&[("x-api-key", "abc123")]);
        assert_eq!(ApiKeyExtractor::from_headers(&map).as_deref(), Some("abc123"));
    }

    #[test]
    fn x_api_key_wins_over_authorization() {
        let map = headers(&[("x-api-key", "primary"), ("authorization", "Bearer other")]);
        assert_eq!(ApiKeyExtractor::from_headers(&map).as_deref(), Some("primary"));
    }

    #[test]
    fn falls_back_to_bearer_and_apikey_schemes() {
        let bearer = headers(&[("authorization", "Bearer k1")]);
        assert_eq!(ApiKeyExtractor::from_headers(&bearer).as_deref(), Some("k1"));

        let apikey = headers(&[("authorization", "ApiKey k2")]);
        assert_eq!(ApiKeyExtractor::from_headers(&apikey).as_deref(), Some("k2"));
    }

    #[test]
    fn empty_primary_header_falls_back() {
        let map = headers(&[("x-api-key", ""), ("authorization", "Bearer k1")]);
        assert_eq!(ApiKeyExtractor::from_headers(&map).as_deref(), Some("k1"));
    }

    #[test]
    fn rejects_unknown_scheme_and_empty_values() {
        assert!(ApiKeyExtractor::from_headers(&headers(&[("authorization", "Basic dXNlcg==")])).is_none());
        assert!(ApiKeyExtractor::from_headers(&headers(&[("authorization", "Bearer ")])).is_none());
        assert!(ApiKeyExtractor::from_headers(&headers(&[("authorization", "Bearer")])).is_none());
        assert!(ApiKeyExtractor::from_headers(&HeaderMap::new()).is_none());
    }
}
