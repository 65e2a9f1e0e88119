use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, HeaderMap, HeaderValue, VARY,
};

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type";
const PREFLIGHT_MAX_AGE_SECS: &str = "86400";

/// Cross-origin policy applied to every response, errors and preflights included.
#[derive(Clone, Debug, Default)]
pub struct CorsPolicy {
    // Empty means any origin is allowed
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: &[String]) -> Self {
        CorsPolicy {
            allowed_origins: allowed_origins
                .iter()
                .map(|origin| origin.trim_end_matches('/').to_string())
                .collect(),
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty()
    }

    /// With an allowlist configured, requests without an Origin header are rejected.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        if self.allows_any_origin() {
            return true;
        }

        origin.is_some_and(|origin| {
            let origin = origin.trim_end_matches('/');
            self.allowed_origins.iter().any(|allowed| allowed == origin)
        })
    }

    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        if self.allows_any_origin() {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        } else {
            // The response depends on the request origin
            headers.insert(VARY, HeaderValue::from_static("Origin"));
            if let Some(origin) = origin.filter(|o| self.is_allowed(Some(*o)))
                && let Ok(value) = HeaderValue::from_str(origin)
            {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }

        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
        );
    }
}
