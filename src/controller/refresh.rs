//! DiscoveredClusterRefresh controller implementation
//!
//! A refresh signal queues an immediate pass of the namespace's `discovery`
//! config and is then deleted. The pass goes through the DiscoveryConfig
//! controller's own queue, so it never runs alongside a scheduled pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::crd::{DiscoveredClusterRefresh, DiscoveryConfig};
use crate::{Error, DISCOVERY_CONFIG_NAME};

/// Kubernetes operations used by the refresh controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RefreshKubeClient: Send + Sync {
    /// Whether the named DiscoveryConfig exists
    async fn discovery_config_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Delete a refresh signal; a missing one is success
    async fn delete_refresh(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct RefreshKubeClientImpl {
    client: Client,
}

impl RefreshKubeClientImpl {
    /// Create a new RefreshKubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RefreshKubeClient for RefreshKubeClientImpl {
    async fn discovery_config_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<DiscoveryConfig> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn delete_refresh(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<DiscoveredClusterRefresh> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Controller context for refresh signals
pub struct RefreshContext {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn RefreshKubeClient>,
    /// Feeds the DiscoveryConfig controller's queue
    pub trigger: mpsc::Sender<ObjectRef<DiscoveryConfig>>,
    /// Requeue delay after a failed dispatch or delete
    pub retry_interval: Duration,
}

/// Reconcile a DiscoveredClusterRefresh
///
/// A signal whose target does not exist is discarded. A signal whose dispatch
/// or delete fails stays and is retried; a repeated dispatch is harmless.
#[instrument(skip(refresh, ctx), fields(refresh = %refresh.name_any(), namespace = %refresh.namespace().unwrap_or_default()))]
pub async fn reconcile(
    refresh: Arc<DiscoveredClusterRefresh>,
    ctx: Arc<RefreshContext>,
) -> Result<Action, Error> {
    let name = refresh.name_any();
    let Some(namespace) = refresh.namespace() else {
        return Err(Error::internal("DiscoveredClusterRefresh has no namespace"));
    };

    if ctx
        .kube
        .discovery_config_exists(&namespace, DISCOVERY_CONFIG_NAME)
        .await?
    {
        let target = ObjectRef::<DiscoveryConfig>::new(DISCOVERY_CONFIG_NAME).within(&namespace);
        ctx.trigger
            .send(target)
            .await
            .map_err(|_| Error::internal("discovery controller is not accepting refreshes"))?;
        info!("queued discovery refresh");
    } else {
        debug!("no DiscoveryConfig to refresh, discarding signal");
    }

    ctx.kube.delete_refresh(&namespace, &name).await?;
    Ok(Action::await_change())
}

/// Error policy for the refresh controller
pub fn error_policy(
    refresh: Arc<DiscoveredClusterRefresh>,
    error: &Error,
    ctx: Arc<RefreshContext>,
) -> Action {
    error!(?error, refresh = %refresh.name_any(), "refresh dispatch failed");
    Action::requeue(ctx.retry_interval)
}
