//! Default request headers for the HTTP client (§6 wire protocol defaults).
//!
//! Gallery sites expect a browser-shaped `User-Agent`, not a self-identifying
//! tool string — unlike an API client, presenting as a bot here gets you an
//! immediate 403 rather than a polite rate limit.

/// Default `User-Agent` (§6: `Mozilla/5.0…`).
pub(crate) const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";

/// Default `Accept` header (§6).
pub(crate) const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Default `Accept-Language` header (§6: `ja,en-US;en`).
pub(crate) const DEFAULT_ACCEPT_LANGUAGE: &str = "ja,en-US;q=0.9,en;q=0.8";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_agent_looks_like_a_browser() {
        assert!(DEFAULT_USER_AGENT.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn default_accept_language_prefers_japanese() {
        assert!(DEFAULT_ACCEPT_LANGUAGE.starts_with("ja"));
    }
}
