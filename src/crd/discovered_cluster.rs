//! DiscoveredCluster Custom Resource Definition
//!
//! One DiscoveredCluster mirrors one OCM subscription. Its name is the
//! external cluster id, it is owned by the DiscoveryConfig that found it, and
//! its managed flag belongs to the managed overlay alone.

use chrono::{DateTime, Utc};
use kube::api::ObjectMeta;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::discovery_config::DiscoveryConfig;
use super::types::CredentialRef;
use crate::MANAGED_LABEL;

/// Specification for a DiscoveredCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "discovery.open-cluster-management.io",
    version = "v1",
    kind = "DiscoveredCluster",
    plural = "discoveredclusters",
    namespaced,
    printcolumn = r#"{"name":"Display Name","type":"string","jsonPath":".spec.displayName"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.openshiftVersion"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".spec.status"}"#,
    printcolumn = r#"{"name":"Managed","type":"boolean","jsonPath":".spec.isManagedCluster"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredClusterSpec {
    /// External cluster id
    pub name: String,

    /// Human-friendly name
    #[serde(default)]
    pub display_name: String,

    /// Web console URL
    #[serde(default)]
    pub console: String,

    /// API server URL derived from the console URL
    #[serde(default)]
    pub api_url: String,

    /// When the cluster was registered with OCM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Last telemetry report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_timestamp: Option<DateTime<Utc>>,

    /// Platform type (OCP, ROSA, ARO, OSD, ...)
    #[serde(default, rename = "type")]
    pub type_: String,

    /// OpenShift version reported by the cluster
    #[serde(default)]
    pub openshift_version: String,

    /// Cloud provider id
    #[serde(default)]
    pub cloud_provider: String,

    /// Cloud region id
    #[serde(default)]
    pub region: String,

    /// Subscription lifecycle status (Active, Disconnected, Stale, ...)
    #[serde(default)]
    pub status: String,

    /// OpenShift cluster id, same as `name`
    #[serde(default)]
    pub ocp_cluster_id: String,

    /// OCM's internal cluster id, when the cluster is OCM-provisioned
    #[serde(default)]
    pub rhocm_cluster_id: String,

    /// Secret the cluster was discovered with
    #[serde(default)]
    pub credential: CredentialRef,

    /// Set by the managed overlay when a ManagedCluster carries this id
    #[serde(default)]
    pub is_managed_cluster: bool,
}

impl DiscoveredClusterSpec {
    /// Equality used by the diff: every discovered field, ignoring the managed
    /// flag, with timestamps compared at whole seconds
    pub fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.display_name == other.display_name
            && self.console == other.console
            && self.api_url == other.api_url
            && same_second(self.creation_timestamp, other.creation_timestamp)
            && same_second(self.activity_timestamp, other.activity_timestamp)
            && self.type_ == other.type_
            && self.openshift_version == other.openshift_version
            && self.cloud_provider == other.cloud_provider
            && self.region == other.region
            && self.status == other.status
            && self.ocp_cluster_id == other.ocp_cluster_id
            && self.rhocm_cluster_id == other.rhocm_cluster_id
            && self.credential == other.credential
    }
}

fn same_second(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    a.map(|t| t.timestamp()) == b.map(|t| t.timestamp())
}

impl DiscoveredCluster {
    /// Build a new record owned by `config`, in its namespace
    pub fn owned_by(config: &DiscoveryConfig, spec: DiscoveredClusterSpec) -> Self {
        let owner = config
            .controller_owner_ref(&())
            .map(|mut r| {
                r.block_owner_deletion = Some(true);
                r
            })
            .into_iter()
            .collect::<Vec<_>>();
        Self {
            metadata: ObjectMeta {
                name: Some(spec.name.clone()),
                namespace: config.namespace(),
                owner_references: (!owner.is_empty()).then_some(owner),
                ..Default::default()
            },
            spec,
        }
    }

    /// Whether the managed label is present
    pub fn has_managed_label(&self) -> bool {
        self.labels().get(MANAGED_LABEL).map(String::as_str) == Some("true")
    }

    /// Whether both halves of the managed pair are set
    pub fn is_managed(&self) -> bool {
        self.spec.is_managed_cluster && self.has_managed_label()
    }

    /// Whether the managed pair already equals `managed`
    pub fn managed_matches(&self, managed: bool) -> bool {
        if managed {
            self.is_managed()
        } else {
            !self.spec.is_managed_cluster && !self.has_managed_label()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DiscoveryConfigSpec;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn sample_spec() -> DiscoveredClusterSpec {
        DiscoveredClusterSpec {
            name: "69aced7c-286d-471c-9482-eac8a1cd2e17".to_string(),
            display_name: "installer-cluster".to_string(),
            console: "https://console-openshift-console.apps.installer-cluster.dev01.red-chesterfield.com".to_string(),
            api_url: "https://api.installer-cluster.dev01.red-chesterfield.com:6443".to_string(),
            creation_timestamp: Some(Utc.with_ymd_and_hms(2020, 7, 30, 19, 19, 42).unwrap()),
            activity_timestamp: Some(Utc.with_ymd_and_hms(2021, 1, 27, 9, 7, 19).unwrap()),
            type_: "OCP".to_string(),
            openshift_version: "4.6.8".to_string(),
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            status: "Active".to_string(),
            ocp_cluster_id: "69aced7c-286d-471c-9482-eac8a1cd2e17".to_string(),
            rhocm_cluster_id: String::new(),
            credential: CredentialRef {
                name: "ocm-api-token".to_string(),
                namespace: "open-cluster-management".to_string(),
            },
            is_managed_cluster: false,
        }
    }

    fn owning_config() -> DiscoveryConfig {
        let mut config = DiscoveryConfig::new("discovery", DiscoveryConfigSpec::default());
        config.metadata.namespace = Some("open-cluster-management".to_string());
        config.metadata.uid = Some("b9d2b3a4-0000-4000-8000-000000000001".to_string());
        config
    }

    /// Story: The overlay's flag never makes two records unequal
    ///
    /// If the diff compared the managed flag, every inventory pass would
    /// reset clusters the overlay had just marked as managed.
    #[test]
    fn story_managed_flag_is_ignored_by_equality() {
        let existing = DiscoveredClusterSpec {
            is_managed_cluster: true,
            ..sample_spec()
        };
        assert!(existing.same_as(&sample_spec()));
    }

    #[test]
    fn sub_second_timestamp_differences_are_equal() {
        let base = sample_spec();
        let mut jittered = sample_spec();
        jittered.activity_timestamp = base
            .activity_timestamp
            .map(|t| t + chrono::Duration::milliseconds(450));

        assert!(base.same_as(&jittered));

        jittered.activity_timestamp = base
            .activity_timestamp
            .map(|t| t + chrono::Duration::seconds(1));
        assert!(!base.same_as(&jittered));
    }

    #[test]
    fn visible_field_changes_break_equality() {
        let base = sample_spec();

        let mut changed = sample_spec();
        changed.openshift_version = "4.6.9".to_string();
        assert!(!base.same_as(&changed));

        let mut changed = sample_spec();
        changed.creation_timestamp = None;
        assert!(!base.same_as(&changed));
    }

    #[test]
    fn owned_by_links_back_to_config() {
        let record = DiscoveredCluster::owned_by(&owning_config(), sample_spec());

        assert_eq!(
            record.metadata.name.as_deref(),
            Some("69aced7c-286d-471c-9482-eac8a1cd2e17")
        );
        assert_eq!(
            record.metadata.namespace.as_deref(),
            Some("open-cluster-management")
        );

        let owners = record.metadata.owner_references.unwrap_or_default();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "DiscoveryConfig");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn managed_pair_requires_both_halves() {
        let mut record = DiscoveredCluster::owned_by(&owning_config(), sample_spec());
        assert!(record.managed_matches(false));

        record.spec.is_managed_cluster = true;
        assert!(!record.is_managed());
        assert!(!record.managed_matches(false));

        record.metadata.labels = Some(BTreeMap::from([(
            MANAGED_LABEL.to_string(),
            "true".to_string(),
        )]));
        assert!(record.is_managed());
        assert!(record.managed_matches(true));
    }

    #[test]
    fn spec_serializes_type_and_camel_case() {
        let json = serde_json::to_value(sample_spec()).unwrap();
        assert_eq!(json["type"], "OCP");
        assert_eq!(json["openshiftVersion"], "4.6.8");
        assert_eq!(json["isManagedCluster"], false);
        assert_eq!(json["credential"]["namespace"], "open-cluster-management");
    }
}
