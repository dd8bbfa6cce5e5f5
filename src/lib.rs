//! Discovery operator - mirrors OpenShift Cluster Manager inventory into Kubernetes
//!
//! Each namespace may carry one `DiscoveryConfig` naming a credential secret and
//! a filter. The operator exchanges that credential for a short-lived token,
//! pages through the OCM subscription inventory, translates every surviving
//! subscription into a `DiscoveredCluster` and keeps the namespace's set of
//! `DiscoveredCluster` resources equal to it.
//!
//! # Control loops
//!
//! - DiscoveryConfig: periodic and on-demand discovery passes (diff and apply)
//! - DiscoveredClusterRefresh: one-shot signals that force an immediate pass
//! - Managed overlay: flags discovered clusters that are already imported as
//!   `ManagedCluster` resources
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (DiscoveryConfig, DiscoveredCluster, DiscoveredClusterRefresh)
//! - [`ocm`] - OCM API clients: credentials, token exchange, inventory, filters, translation
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`settings`] - Process-wide settings threaded into every component
//! - [`metrics`] - OpenTelemetry instruments
//! - [`telemetry`] - Tracing and metrics export setup
//! - [`retry`] - Backoff helper for startup operations
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod ocm;
pub mod retry;
pub mod settings;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Naming conventions shared by the controllers and the CRDs
// =============================================================================

/// Name a DiscoveryConfig must carry to be reconciled (one unit per namespace)
pub const DISCOVERY_CONFIG_NAME: &str = "discovery";

/// Label marking a DiscoveredCluster as already imported
pub const MANAGED_LABEL: &str = "isManagedCluster";

/// Label on ManagedCluster resources holding the OpenShift cluster id
pub const MANAGED_CLUSTER_ID_LABEL: &str = "clusterID";

/// DiscoveryConfig annotation overriding the inventory base URL
pub const OCM_BASE_URL_ANNOTATION: &str = "ocmBaseURL";

/// DiscoveryConfig annotation overriding the token endpoint base URL
pub const AUTH_BASE_URL_ANNOTATION: &str = "authBaseURL";

/// Field manager used for server-side apply and patches
pub const FIELD_MANAGER: &str = "discovery-operator";

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default OCM API base URL
pub const DEFAULT_OCM_BASE_URL: &str = "https://api.openshift.com";

/// Default SSO base URL for token exchange
pub const DEFAULT_AUTH_BASE_URL: &str = "https://sso.redhat.com";

/// Default number of subscriptions requested per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;
