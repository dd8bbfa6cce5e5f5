//! DiscoveryConfig Custom Resource Definition
//!
//! A DiscoveryConfig is one reconciliation unit: it names the credential
//! secret used to reach OCM and the filter applied to the inventory. Only the
//! config named `discovery` in a namespace is acted upon.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Filter;

/// Specification for a DiscoveryConfig
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "discovery.open-cluster-management.io",
    version = "v1",
    kind = "DiscoveryConfig",
    plural = "discoveryconfigs",
    shortname = "dc",
    namespaced,
    printcolumn = r#"{"name":"Credential","type":"string","jsonPath":".spec.credential"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfigSpec {
    /// Name of the Secret (same namespace) holding OCM credentials
    #[serde(default)]
    pub credential: String,

    /// Restrictions on which clusters to discover
    #[serde(default)]
    pub filters: Filter,
}

impl DiscoveryConfigSpec {
    /// Validate the config specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.filters.validate()
    }
}

impl DiscoveryConfig {
    /// Whether this config follows the one-per-namespace naming convention
    pub fn is_reconcilable(&self) -> bool {
        self.metadata.name.as_deref() == Some(crate::DISCOVERY_CONFIG_NAME)
    }
}
