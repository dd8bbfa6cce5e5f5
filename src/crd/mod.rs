//! Custom Resource Definitions for discovery
//!
//! This module contains all CRD definitions owned by the discovery operator.
//! `ManagedCluster` is not defined here: it belongs to the hub and is read
//! dynamically by the managed overlay.

mod discovered_cluster;
mod discovery_config;
mod refresh;
mod types;

pub use discovered_cluster::{DiscoveredCluster, DiscoveredClusterSpec};
pub use discovery_config::{DiscoveryConfig, DiscoveryConfigSpec};
pub use refresh::{DiscoveredClusterRefresh, DiscoveredClusterRefreshSpec};
pub use types::{CredentialRef, Filter};

use kube::api::GroupVersionKind;

/// API group of ManagedCluster
pub const MANAGED_CLUSTER_GROUP: &str = "cluster.open-cluster-management.io";

/// Group/version/kind of the hub's ManagedCluster resource
pub fn managed_cluster_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(MANAGED_CLUSTER_GROUP, "v1", "ManagedCluster")
}
