//! DiscoveredClusterRefresh Custom Resource Definition
//!
//! Creating one forces an immediate discovery pass of the `discovery` config
//! in the same namespace. The operator deletes it once the pass is queued.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a DiscoveredClusterRefresh (intentionally empty)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "discovery.open-cluster-management.io",
    version = "v1",
    kind = "DiscoveredClusterRefresh",
    plural = "discoveredclusterrefreshes",
    namespaced
)]
pub struct DiscoveredClusterRefreshSpec {}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_uses_refresh_plural() {
        let crd = DiscoveredClusterRefresh::crd();
        assert_eq!(crd.spec.names.plural, "discoveredclusterrefreshes");
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
