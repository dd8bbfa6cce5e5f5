//! Process-wide settings
//!
//! Everything that used to be a tunable constant (base URLs, page size, loop
//! intervals) lives in [`DiscoverySettings`]. The binary builds one from its
//! CLI arguments and hands clones to each controller context.

use std::time::Duration;

use crate::crd::DiscoveryConfig;
use crate::{
    AUTH_BASE_URL_ANNOTATION, DEFAULT_AUTH_BASE_URL, DEFAULT_OCM_BASE_URL, DEFAULT_PAGE_SIZE,
    OCM_BASE_URL_ANNOTATION,
};

/// Default time between discovery passes for a healthy unit
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default retry delay after a transient remote failure
pub const DEFAULT_TRANSIENT_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default retry delay after a store error surfaced to `error_policy`
pub const DEFAULT_ERROR_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Default period of the managed overlay safety-net pass
pub const DEFAULT_OVERLAY_RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default per-request HTTP timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every discovery component
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoverySettings {
    /// Inventory base URL used when a DiscoveryConfig has no override
    pub ocm_base_url: String,
    /// Token endpoint base URL used when a DiscoveryConfig has no override
    pub auth_base_url: String,
    /// Subscriptions requested per page
    pub page_size: usize,
    /// Requeue delay after a completed pass
    pub refresh_interval: Duration,
    /// Requeue delay after a transient auth or inventory failure
    pub transient_retry_interval: Duration,
    /// Requeue delay applied by `error_policy`
    pub error_retry_interval: Duration,
    /// Period of the managed overlay resync tick
    pub overlay_resync_interval: Duration,
    /// Per-request HTTP timeout for OCM calls
    pub http_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            ocm_base_url: DEFAULT_OCM_BASE_URL.to_string(),
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            transient_retry_interval: DEFAULT_TRANSIENT_RETRY_INTERVAL,
            error_retry_interval: DEFAULT_ERROR_RETRY_INTERVAL,
            overlay_resync_interval: DEFAULT_OVERLAY_RESYNC_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl DiscoverySettings {
    /// Inventory base URL for a unit, honouring its annotation override
    pub fn ocm_base_url_for(&self, config: &DiscoveryConfig) -> String {
        annotation_or(config, OCM_BASE_URL_ANNOTATION, &self.ocm_base_url)
    }

    /// Token endpoint base URL for a unit, honouring its annotation override
    pub fn auth_base_url_for(&self, config: &DiscoveryConfig) -> String {
        annotation_or(config, AUTH_BASE_URL_ANNOTATION, &self.auth_base_url)
    }
}

fn annotation_or(config: &DiscoveryConfig, key: &str, fallback: &str) -> String {
    config
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DiscoveryConfigSpec;
    use std::collections::BTreeMap;

    fn config_with_annotations(pairs: &[(&str, &str)]) -> DiscoveryConfig {
        let mut config = DiscoveryConfig::new("discovery", DiscoveryConfigSpec::default());
        config.metadata.annotations = Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        config
    }

    #[test]
    fn defaults_point_at_production_endpoints() {
        let settings = DiscoverySettings::default();
        assert_eq!(settings.ocm_base_url, "https://api.openshift.com");
        assert_eq!(settings.auth_base_url, "https://sso.redhat.com");
        assert_eq!(settings.page_size, 1000);
        assert_eq!(settings.refresh_interval, Duration::from_secs(1800));
    }

    #[test]
    fn annotations_override_base_urls() {
        let settings = DiscoverySettings::default();
        let config = config_with_annotations(&[
            ("ocmBaseURL", "http://mock-ocm:3000/"),
            ("authBaseURL", "http://mock-sso:3000"),
        ]);

        assert_eq!(settings.ocm_base_url_for(&config), "http://mock-ocm:3000");
        assert_eq!(settings.auth_base_url_for(&config), "http://mock-sso:3000");
    }

    #[test]
    fn blank_annotation_falls_back_to_settings() {
        let settings = DiscoverySettings::default();
        let config = config_with_annotations(&[("ocmBaseURL", "  ")]);

        assert_eq!(settings.ocm_base_url_for(&config), "https://api.openshift.com");
        assert_eq!(settings.auth_base_url_for(&config), "https://sso.redhat.com");
    }
}
