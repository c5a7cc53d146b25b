//! Header names and helpers for API requests.

/// Application version header sent on every request.
pub const APP_VERSION: &str = "x-pm-appversion";

/// Session UID header sent on authenticated requests.
pub const UID: &str = "x-pm-uid";

pub const AUTHORIZATION: &str = "Authorization";
pub const USER_AGENT: &str = "User-Agent";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const ACCEPT: &str = "Accept";
pub const RETRY_AFTER: &str = "Retry-After";

/// Bearer authorization value for an access token.
pub fn bearer(access_token: &str) -> String {
    format!("Bearer {}", access_token)
}

/// Set a header, replacing any existing value (case-insensitive name match).
pub fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: impl Into<String>) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.into()));
}

/// Find a header value by name (case-insensitive).
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Headers every request carries regardless of authentication.
pub fn base_headers(app_version: &str, user_agent: &str) -> Vec<(String, String)> {
    vec![
        (APP_VERSION.to_string(), app_version.to_string()),
        (USER_AGENT.to_string(), user_agent.to_string()),
    ]
}
