//! Discovery Operator - mirrors OCM cluster inventory into DiscoveredCluster resources

use std::time::Duration;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use discovery_operator::controller::run_controllers;
use discovery_operator::crd::{DiscoveredCluster, DiscoveredClusterRefresh, DiscoveryConfig};
use discovery_operator::retry::{retry_with_backoff, RetryConfig};
use discovery_operator::settings::DiscoverySettings;
use discovery_operator::telemetry::{init_telemetry, TelemetryConfig};
use discovery_operator::{
    DEFAULT_AUTH_BASE_URL, DEFAULT_OCM_BASE_URL, DEFAULT_PAGE_SIZE, FIELD_MANAGER,
};

/// Discovery operator - keeps DiscoveredCluster resources in sync with OCM
#[derive(Parser, Debug)]
#[command(name = "discovery-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Installs the CRDs, then runs the DiscoveryConfig and
    /// DiscoveredClusterRefresh controllers alongside the managed overlay.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Inventory base URL used when a DiscoveryConfig has no override
    #[arg(long, env = "OCM_BASE_URL", default_value = DEFAULT_OCM_BASE_URL)]
    ocm_base_url: String,

    /// Token endpoint base URL used when a DiscoveryConfig has no override
    #[arg(long, env = "AUTH_BASE_URL", default_value = DEFAULT_AUTH_BASE_URL)]
    auth_base_url: String,

    /// Subscriptions requested per inventory page
    #[arg(long, env = "DISCOVERY_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Seconds between discovery passes
    #[arg(long, env = "DISCOVERY_REFRESH_INTERVAL_SECS", default_value = "1800")]
    refresh_interval_secs: u64,

    /// Seconds before retrying after a transient OCM failure
    #[arg(long, env = "DISCOVERY_TRANSIENT_RETRY_SECS", default_value = "300")]
    transient_retry_secs: u64,

    /// Seconds before retrying after a Kubernetes error
    #[arg(long, env = "DISCOVERY_ERROR_RETRY_SECS", default_value = "30")]
    error_retry_secs: u64,

    /// Seconds between managed overlay resyncs
    #[arg(long, env = "DISCOVERY_OVERLAY_RESYNC_SECS", default_value = "300")]
    overlay_resync_secs: u64,

    /// Per-request HTTP timeout in seconds for OCM calls
    #[arg(long, env = "DISCOVERY_HTTP_TIMEOUT_SECS", default_value = "30")]
    http_timeout_secs: u64,
}

impl ControllerArgs {
    fn settings(&self) -> anyhow::Result<DiscoverySettings> {
        if self.page_size == 0 {
            anyhow::bail!("--page-size must be at least 1");
        }
        for (flag, secs) in [
            ("--refresh-interval-secs", self.refresh_interval_secs),
            ("--transient-retry-secs", self.transient_retry_secs),
            ("--error-retry-secs", self.error_retry_secs),
            ("--overlay-resync-secs", self.overlay_resync_secs),
            ("--http-timeout-secs", self.http_timeout_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{flag} must be at least 1");
            }
        }
        Ok(DiscoverySettings {
            ocm_base_url: self.ocm_base_url.trim_end_matches('/').to_string(),
            auth_base_url: self.auth_base_url.trim_end_matches('/').to_string(),
            page_size: self.page_size,
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            transient_retry_interval: Duration::from_secs(self.transient_retry_secs),
            error_retry_interval: Duration::from_secs(self.error_retry_secs),
            overlay_resync_interval: Duration::from_secs(self.overlay_resync_secs),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both kube and reqwest speak rustls; pin the provider before either builds a client
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        for crd in [
            DiscoveryConfig::crd(),
            DiscoveredCluster::crd(),
            DiscoveredClusterRefresh::crd(),
        ] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::parse_from(["controller"]),
    };

    let guard = init_telemetry(TelemetryConfig::default())?;
    let result = run_controller(args).await;
    guard.shutdown();
    result
}

/// Run the controller
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let settings = args.settings()?;
    tracing::info!(
        ocm_base_url = %settings.ocm_base_url,
        auth_base_url = %settings.auth_base_url,
        page_size = settings.page_size,
        "Discovery operator starting"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let retry = RetryConfig::with_max_attempts(10);
    retry_with_backoff(&retry, "install_crds", || ensure_crds_installed(&client)).await?;

    run_controllers(client, settings).await?;

    tracing::info!("Discovery operator shutting down");
    Ok(())
}

/// Ensure the discovery CRDs are installed
///
/// Server-side apply keeps the installed schemas in step with this binary.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [
        DiscoveryConfig::crd(),
        DiscoveredCluster::crd(),
        DiscoveredClusterRefresh::crd(),
    ] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All discovery CRDs installed/updated");
    Ok(())
}
