use crate::types::Provider;

/// Infer which OAuth provider guards a server, from its endpoint and
/// description.
///
/// Only remote endpoints are considered; local stdio servers never need
/// OAuth. `gmail` is checked before the broader `google`.
#[must_use]
pub fn detect_provider(endpoint: &str, description: Option<&str>) -> Option<Provider> {
    let lower = endpoint.trim().to_ascii_lowercase();
    let remote = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme));
    if !remote {
        return None;
    }
    let haystack = format!(
        "{lower} {}",
        description.unwrap_or_default().to_ascii_lowercase()
    );
    if haystack.contains(Provider::GMAIL) {
        Some(Provider::gmail())
    } else if haystack.contains(Provider::GOOGLE) {
        Some(Provider::google())
    } else {
        None
    }
}
