//! OpenShift Cluster Manager integration
//!
//! - [`credentials`] - reads an auth method out of a credential secret
//! - [`auth`] - exchanges it for a short-lived access token
//! - [`subscription`] - pages through the subscription inventory
//! - [`filters`] - server-side pre-filter and client-side post-filters
//! - [`translate`] - turns a subscription into a DiscoveredCluster spec

pub mod auth;
pub mod credentials;
pub mod filters;
pub mod subscription;
pub mod translate;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use auth::{HttpTokenExchanger, TokenExchanger};
pub use credentials::{AuthMethod, AuthRequest, ResolvedCredential};
pub use subscription::{HttpInventoryClient, InventoryClient, InventoryRequest, Subscription};

use crate::crd::{CredentialRef, DiscoveredClusterSpec, Filter};

/// The filtered, translated set a namespace should contain, keyed by cluster id
///
/// When OCM reports the same cluster twice, the later record wins.
pub fn canonical_set(
    subscriptions: Vec<Subscription>,
    filter: &Filter,
    credential: &CredentialRef,
    now: DateTime<Utc>,
) -> BTreeMap<String, DiscoveredClusterSpec> {
    filters::post_filter(subscriptions, filter, now)
        .iter()
        .filter_map(|s| translate::translate(s, credential))
        .filter(|spec| filters::matches_allow_lists(spec, filter))
        .map(|spec| (spec.name.clone(), spec))
        .collect()
}
