//! Common helper functions for kitstream.

/// Read a non-empty, trimmed environment variable.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Strip whitespace and trailing slashes from a server base URL.
///
/// Returns `None` when nothing is left, so callers can fall back to a default.
pub fn normalize_server(server: &str) -> Option<String> {
    let trimmed = server.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
