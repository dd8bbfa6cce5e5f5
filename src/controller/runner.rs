//! Wiring for the three control loops
//!
//! The DiscoveryConfig controller owns every discovery pass. Refresh signals
//! reach it through `reconcile_on`, so scheduled and on-demand passes share one
//! queue and never overlap for a namespace. The managed overlay runs beside the
//! controllers and stops when they do.

use std::fmt::Debug;
use std::future::{ready, Ready};
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::discovery_config::{self, Context};
use super::managed::{run_managed_overlay, ManagedKubeClientImpl, OverlayTiming};
use super::refresh::{self, RefreshContext, RefreshKubeClientImpl};
use crate::crd::{DiscoveredClusterRefresh, DiscoveryConfig};
use crate::settings::DiscoverySettings;
use crate::Error;

/// Pending refresh dispatches held before a refresh reconcile waits
pub const REFRESH_QUEUE_CAPACITY: usize = 64;

/// Server-side watch timeout, kept under the client's read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build a `for_each` callback that logs one controller's reconcile results
pub fn log_reconcile_result<T, E>(controller: &'static str) -> impl Fn(Result<T, E>) -> Ready<()>
where
    T: Debug,
    E: Debug,
{
    move |result| {
        match result {
            Ok(obj) => debug!(controller, ?obj, "reconciliation completed"),
            Err(e) => error!(controller, error = ?e, "reconciliation error"),
        }
        ready(())
    }
}

/// Run every control loop until a shutdown signal arrives
pub async fn run_controllers(client: Client, settings: DiscoverySettings) -> Result<(), Error> {
    let nudge = Arc::new(Notify::new());
    let (trigger_tx, trigger_rx) = mpsc::channel::<ObjectRef<DiscoveryConfig>>(REFRESH_QUEUE_CAPACITY);

    let ctx = Arc::new(
        Context::builder(client.clone())
            .settings(settings.clone())
            .overlay_nudge(nudge.clone())
            .build()?,
    );
    let refresh_ctx = Arc::new(RefreshContext {
        kube: Arc::new(RefreshKubeClientImpl::new(client.clone())),
        trigger: trigger_tx,
        retry_interval: settings.error_retry_interval,
    });

    let configs: Api<DiscoveryConfig> = Api::all(client.clone());
    let refreshes: Api<DiscoveredClusterRefresh> = Api::all(client.clone());

    info!("starting discovery controllers");
    info!("  - DiscoveryConfig controller");
    info!("  - DiscoveredClusterRefresh controller");
    info!("  - managed overlay");

    let discovery_controller =
        Controller::new(configs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .reconcile_on(ReceiverStream::new(trigger_rx))
            .shutdown_on_signal()
            .run(discovery_config::reconcile, discovery_config::error_policy, ctx)
            .for_each(log_reconcile_result("DiscoveryConfig"));

    let refresh_controller =
        Controller::new(refreshes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(refresh::reconcile, refresh::error_policy, refresh_ctx)
            .for_each(log_reconcile_result("DiscoveredClusterRefresh"));

    let cancel = CancellationToken::new();
    let overlay = tokio::spawn(run_managed_overlay(
        client.clone(),
        Arc::new(ManagedKubeClientImpl::new(client)),
        nudge,
        OverlayTiming {
            resync: settings.overlay_resync_interval,
            retry: settings.error_retry_interval,
        },
        cancel.clone(),
    ));

    // Both controllers stop together on SIGTERM/SIGINT
    tokio::join!(discovery_controller, refresh_controller);

    cancel.cancel();
    if let Err(e) = overlay.await {
        error!(error = %e, "managed overlay task failed");
    }

    info!("discovery controllers stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn result_logger_accepts_both_outcomes() {
        let log = log_reconcile_result::<&str, String>("test");
        log(Ok("done")).await;
        log(Err("boom".to_string())).await;
    }
}
