//! Subscription to DiscoveredCluster translation

use super::subscription::Subscription;
use crate::crd::{CredentialRef, DiscoveredClusterSpec};

/// Console URL prefix shared by OpenShift 4 routes
const CONSOLE_PREFIX: &str = "https://console-openshift-console.apps.";

/// Build the DiscoveredCluster spec for a subscription
///
/// Returns `None` for subscriptions that cannot identify a cluster: no
/// external id, no metrics, or a reserved placeholder.
pub fn translate(
    subscription: &Subscription,
    credential: &CredentialRef,
) -> Option<DiscoveredClusterSpec> {
    let metrics = subscription.metrics.first()?;
    if subscription.external_cluster_id.is_empty() || subscription.status == "Reserved" {
        return None;
    }

    let host = console_host(&subscription.console_url);

    Some(DiscoveredClusterSpec {
        name: subscription.external_cluster_id.clone(),
        display_name: display_name(subscription, host),
        console: subscription.console_url.clone(),
        api_url: host
            .map(|h| format!("https://api.{h}:6443"))
            .unwrap_or_default(),
        creation_timestamp: subscription.created_at,
        activity_timestamp: subscription.last_telemetry_date,
        type_: cluster_type(&subscription.plan.id),
        openshift_version: metrics.openshift_version.clone(),
        cloud_provider: subscription.cloud_provider_id.clone(),
        region: subscription.region_id.clone(),
        status: subscription.status.clone(),
        ocp_cluster_id: subscription.external_cluster_id.clone(),
        rhocm_cluster_id: subscription.cluster_id.clone(),
        credential: credential.clone(),
        is_managed_cluster: false,
    })
}

/// Cluster domain from a standard console URL, without any port
fn console_host(console_url: &str) -> Option<&str> {
    let rest = console_url.strip_prefix(CONSOLE_PREFIX)?;
    let host = match rest.rfind(':') {
        Some(i) => &rest[..i],
        None => rest,
    };
    (!host.is_empty()).then_some(host)
}

fn display_name(subscription: &Subscription, host: Option<&str>) -> String {
    if !subscription.display_name.is_empty()
        && subscription.display_name != subscription.external_cluster_id
    {
        return subscription.display_name.clone();
    }
    match host {
        Some(h) => h.replace('.', "-"),
        None => subscription.external_cluster_id.clone(),
    }
}

/// OCM reports ROSA under its legacy plan ids
fn cluster_type(plan_id: &str) -> String {
    match plan_id {
        "MOA" | "MOA-HostedControlPlane" => "ROSA".to_string(),
        other => other.to_string(),
    }
}
