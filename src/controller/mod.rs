//! Controller implementations for the discovery CRDs
//!
//! - [`discovery_config`] - discovery passes: fetch, diff and apply
//! - [`refresh`] - one-shot refresh signals
//! - [`managed`] - overlay of the `isManagedCluster` flag
//! - [`runner`] - wires the loops together

pub mod discovery_config;
pub mod managed;
pub mod refresh;
pub mod runner;

pub use discovery_config::{
    apply_plan, error_policy, plan_changes, reconcile, ChangePlan, Context, ContextBuilder,
    KubeClient, KubeClientImpl,
};
pub use managed::{
    overlay_managed_status, run_managed_overlay, ManagedKubeClient, ManagedKubeClientImpl,
    OverlaySummary, OverlayTiming,
};
pub use refresh::{RefreshContext, RefreshKubeClient, RefreshKubeClientImpl};
pub use runner::{log_reconcile_result, run_controllers};
