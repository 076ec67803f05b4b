//! Inbox engine configuration.
//!
//! All settings have defaults tuned for a typical inbox; deployments can
//! override them through environment variables.

/// Tuning knobs for the aggregation engine and preview resolver.
#[derive(Debug, Clone)]
pub struct InboxConfig {
    /// Maximum documents requested per source query.
    /// Env: `TOIT_SOURCE_PAGE_SIZE`
    /// Default: `100`
    pub source_page_size: usize,

    /// Maximum previewless conversations enriched per merge pass, in view
    /// order. Bounds backend load on large inboxes.
    /// Env: `TOIT_ENRICH_LIMIT`
    /// Default: `8`
    pub enrich_limit: usize,

    /// Documents scanned by the unordered last-resort preview read.
    /// Env: `TOIT_PREVIEW_SCAN_LIMIT`
    /// Default: `20`
    pub preview_scan_limit: usize,

    /// Capacity of the engine's outbound event channel.
    /// Default: `32`
    pub event_capacity: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            source_page_size: 100,
            enrich_limit: 8,
            preview_scan_limit: 20,
            event_capacity: 32,
        }
    }
}

impl InboxConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_usize("TOIT_SOURCE_PAGE_SIZE") {
            config.source_page_size = n;
        }
        if let Some(n) = env_usize("TOIT_ENRICH_LIMIT") {
            config.enrich_limit = n;
        }
        if let Some(n) = env_usize("TOIT_PREVIEW_SCAN_LIMIT") {
            config.preview_scan_limit = n;
        }

        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var = name, value = %value, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InboxConfig::default();
        assert_eq!(config.source_page_size, 100);
        assert_eq!(config.enrich_limit, 8);
        assert_eq!(config.preview_scan_limit, 20);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("TOIT_ENRICH_LIMIT", "4");
        let config = InboxConfig::from_env();
        std::env::remove_var("TOIT_ENRICH_LIMIT");
        assert_eq!(config.enrich_limit, 4);
        assert_eq!(config.source_page_size, 100);
    }

    #[test]
    fn test_invalid_env_falls_back() {
        std::env::set_var("TOIT_PREVIEW_SCAN_LIMIT", "plenty");
        let config = InboxConfig::from_env();
        std::env::remove_var("TOIT_PREVIEW_SCAN_LIMIT");
        assert_eq!(config.preview_scan_limit, 20);
    }
}
