//! Managed overlay
//!
//! Marks DiscoveredClusters whose id appears as the `clusterID` label of a
//! ManagedCluster. The overlay runs independently of discovery:
//! 1. Immediately on ManagedCluster watch events
//! 2. After every applied discovery pass (nudge)
//! 3. Periodically as a safety net
//! 4. After a bounded delay when a pass left failed writes behind
//!
//! Read failures skip the pass; the overlay never fails the process.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kube::api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{managed_cluster_gvk, DiscoveredCluster};
use crate::metrics;
use crate::{Error, FIELD_MANAGER, MANAGED_CLUSTER_ID_LABEL, MANAGED_LABEL};

/// Kubernetes operations used by the managed overlay
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManagedKubeClient: Send + Sync {
    /// Cluster ids carried by ManagedCluster resources
    async fn list_managed_cluster_ids(&self) -> Result<BTreeSet<String>, Error>;

    /// Every DiscoveredCluster, across namespaces
    async fn list_all_discovered(&self) -> Result<Vec<DiscoveredCluster>, Error>;

    /// Set or clear the managed flag and label together
    async fn set_managed(&self, cluster: &DiscoveredCluster, managed: bool) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ManagedKubeClientImpl {
    client: Client,
}

impl ManagedKubeClientImpl {
    /// Create a new ManagedKubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManagedKubeClient for ManagedKubeClientImpl {
    async fn list_managed_cluster_ids(&self) -> Result<BTreeSet<String>, Error> {
        let resource = ApiResource::from_gvk(&managed_cluster_gvk());
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let list = api
            .list_metadata(&ListParams::default().labels(MANAGED_CLUSTER_ID_LABEL))
            .await?;

        Ok(list
            .items
            .iter()
            .filter_map(|mc| mc.labels().get(MANAGED_CLUSTER_ID_LABEL).cloned())
            .filter(|id| !id.is_empty())
            .collect())
    }

    async fn list_all_discovered(&self) -> Result<Vec<DiscoveredCluster>, Error> {
        let api: Api<DiscoveredCluster> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn set_managed(&self, cluster: &DiscoveredCluster, managed: bool) -> Result<(), Error> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<DiscoveredCluster> = Api::namespaced(self.client.clone(), &namespace);

        let label = if managed {
            serde_json::Value::String("true".to_string())
        } else {
            serde_json::Value::Null
        };
        // resourceVersion makes the patch fail on a concurrent write
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": cluster.resource_version(),
                "labels": { MANAGED_LABEL: label }
            },
            "spec": { "isManagedCluster": managed }
        });

        match api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::write_conflict(name)),
            Err(e) => Err(e.into()),
        }
    }
}

/// What one overlay pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverlaySummary {
    /// Records examined
    pub examined: usize,
    /// Records whose managed pair was written
    pub updated: usize,
    /// Writes that failed
    pub failed: usize,
}

/// Bring every DiscoveredCluster's managed pair in line with the managed set
///
/// Writes only records whose pair is stale. An id claimed by several
/// ManagedClusters is simply managed.
#[instrument(skip(kube))]
pub async fn overlay_managed_status(kube: &dyn ManagedKubeClient) -> OverlaySummary {
    let mut summary = OverlaySummary::default();

    let discovered = match kube.list_all_discovered().await {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "failed to list discovered clusters, skipping overlay");
            return summary;
        }
    };
    if discovered.is_empty() {
        debug!("no discovered clusters, nothing to overlay");
        return summary;
    }

    let managed = match kube.list_managed_cluster_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "failed to list managed clusters, skipping overlay");
            return summary;
        }
    };

    for cluster in &discovered {
        summary.examined += 1;
        let should_be_managed = managed.contains(&cluster.name_any());
        if cluster.managed_matches(should_be_managed) {
            continue;
        }

        match kube.set_managed(cluster, should_be_managed).await {
            Ok(()) => {
                summary.updated += 1;
                metrics::record_overlay_update(should_be_managed);
                debug!(
                    cluster = %cluster.name_any(),
                    namespace = %cluster.namespace().unwrap_or_default(),
                    managed = should_be_managed,
                    "updated managed status"
                );
            }
            Err(e) => {
                summary.failed += 1;
                warn!(error = %e, cluster = %cluster.name_any(), "failed to update managed status");
            }
        }
    }

    if summary.updated > 0 || summary.failed > 0 {
        info!(
            examined = summary.examined,
            updated = summary.updated,
            failed = summary.failed,
            "managed overlay applied"
        );
    }
    summary
}

/// When the overlay loop runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayTiming {
    /// Period of the safety-net resync
    pub resync: Duration,
    /// Delay before re-running a pass whose writes failed
    pub retry: Duration,
}

/// Run the managed overlay until `cancel` fires
pub async fn run_managed_overlay(
    client: Client,
    kube: Arc<dyn ManagedKubeClient>,
    nudge: Arc<Notify>,
    timing: OverlayTiming,
    cancel: CancellationToken,
) {
    let resource = ApiResource::from_gvk(&managed_cluster_gvk());
    let api: Api<DynamicObject> = Api::all_with(client, &resource);

    let managed_watcher = watcher::watcher(
        api,
        watcher::Config::default().labels(MANAGED_CLUSTER_ID_LABEL),
    )
    .default_backoff();

    overlay_loop(managed_watcher, kube, nudge, timing, cancel).await;
}

/// Drive overlay passes from watch events, nudges, resync ticks and retries
async fn overlay_loop<S>(
    events: S,
    kube: Arc<dyn ManagedKubeClient>,
    nudge: Arc<Notify>,
    timing: OverlayTiming,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Event<DynamicObject>, watcher::Error>>,
{
    let mut events = std::pin::pin!(events);

    let mut resync_interval = tokio::time::interval(timing.resync);
    resync_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Armed only while the last pass left failed writes behind
    let retry = tokio::time::sleep(timing.retry);
    tokio::pin!(retry);
    let mut retry_armed = false;

    info!("managed overlay started");

    loop {
        let summary = tokio::select! {
            _ = cancel.cancelled() => {
                info!("managed overlay stopping");
                return;
            }
            Some(event) = events.next() => {
                if !should_overlay(&event) {
                    continue;
                }
                overlay_managed_status(kube.as_ref()).await
            }
            _ = nudge.notified() => {
                debug!("overlay nudged by discovery pass");
                overlay_managed_status(kube.as_ref()).await
            }
            _ = resync_interval.tick() => {
                debug!("running periodic managed overlay");
                overlay_managed_status(kube.as_ref()).await
            }
            () = &mut retry, if retry_armed => {
                debug!("retrying failed managed status writes");
                overlay_managed_status(kube.as_ref()).await
            }
        };

        retry_armed = summary.failed > 0;
        if retry_armed {
            retry.as_mut().reset(Instant::now() + timing.retry);
        }
    }
}

/// Whether a watch event calls for an overlay pass
///
/// Initial-list items are batched: one pass runs when the list completes.
fn should_overlay(event: &Result<Event<DynamicObject>, watcher::Error>) -> bool {
    match event {
        Ok(Event::Apply(mc)) | Ok(Event::Delete(mc)) => {
            debug!(managed_cluster = %mc.name_any(), "managed cluster changed");
            true
        }
        Ok(Event::InitDone) => true,
        Ok(Event::Init) | Ok(Event::InitApply(_)) => false,
        Err(e) => {
            warn!(error = %e, "managed cluster watcher error, will retry");
            false
        }
    }
}
