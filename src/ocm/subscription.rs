//! OCM accounts_mgmt subscription inventory
//!
//! The inventory is fetched page by page. Only a page shorter than the
//! requested size ends the listing. The server-reported total is logged but
//! never trusted, so a count that is an exact multiple of the page size costs
//! one trailing empty request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Subscription listing path under the OCM base URL
pub const SUBSCRIPTIONS_PATH: &str = "/api/accounts_mgmt/v1/subscriptions";

/// Treat JSON `null` the same as a missing field
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `{kind, id, href}` reference embedded in subscriptions
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ObjectReference {
    /// Referenced kind
    #[serde(default, deserialize_with = "null_default")]
    pub kind: String,
    /// Referenced id (for `plan`, the cluster type)
    #[serde(default, deserialize_with = "null_default")]
    pub id: String,
    /// API link
    #[serde(default, deserialize_with = "null_default")]
    pub href: String,
}

/// Telemetry block of a subscription
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SubscriptionMetrics {
    /// Reported OpenShift version
    #[serde(default, deserialize_with = "null_default")]
    pub openshift_version: String,
}

/// One OCM subscription record
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Subscription {
    /// Subscription id
    #[serde(default, deserialize_with = "null_default")]
    pub id: String,
    /// OpenShift cluster id
    #[serde(default, deserialize_with = "null_default")]
    pub external_cluster_id: String,
    /// OCM cluster id (empty for self-managed clusters)
    #[serde(default, deserialize_with = "null_default")]
    pub cluster_id: String,
    /// Name set in OCM
    #[serde(default, deserialize_with = "null_default")]
    pub display_name: String,
    /// Console URL
    #[serde(default, deserialize_with = "null_default")]
    pub console_url: String,
    /// Plan; its id is the cluster type
    #[serde(default, deserialize_with = "null_default")]
    pub plan: ObjectReference,
    /// Telemetry, newest first
    #[serde(default, deserialize_with = "null_default")]
    pub metrics: Vec<SubscriptionMetrics>,
    /// Cloud provider id
    #[serde(default, deserialize_with = "null_default")]
    pub cloud_provider_id: String,
    /// Cloud region id
    #[serde(default, deserialize_with = "null_default")]
    pub region_id: String,
    /// Lifecycle status
    #[serde(default, deserialize_with = "null_default")]
    pub status: String,
    /// Registration time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last inventory update
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Last telemetry report
    #[serde(default)]
    pub last_telemetry_date: Option<DateTime<Utc>>,
    /// Whether the cluster is OCM-managed
    #[serde(default, deserialize_with = "null_default")]
    pub managed: bool,
    /// Support level
    #[serde(default, deserialize_with = "null_default")]
    pub support_level: String,
}

/// One page of the subscription listing
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionPage {
    /// Page number echoed by the server
    #[serde(default, deserialize_with = "null_default")]
    pub page: usize,
    /// Items on this page
    #[serde(default, deserialize_with = "null_default")]
    pub size: usize,
    /// Total items across all pages
    #[serde(default, deserialize_with = "null_default")]
    pub total: usize,
    /// The records
    #[serde(default, deserialize_with = "null_default")]
    pub items: Vec<Subscription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OcmErrorBody {
    #[serde(deserialize_with = "null_default")]
    code: String,
    #[serde(deserialize_with = "null_default")]
    reason: String,
}

/// Parameters of one inventory listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryRequest {
    /// Bearer token
    pub token: String,
    /// OCM base URL
    pub base_url: String,
    /// Server-side pre-filter (`search` parameter), if any
    pub search: Option<String>,
    /// Records per page
    pub page_size: usize,
}

/// Lists every subscription visible to a token
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Fetch all pages; any failing page fails the whole listing
    async fn fetch_subscriptions(
        &self,
        request: &InventoryRequest,
    ) -> Result<Vec<Subscription>, Error>;
}

/// [`InventoryClient`] backed by reqwest
#[derive(Clone, Debug)]
pub struct HttpInventoryClient {
    client: reqwest::Client,
}

impl HttpInventoryClient {
    /// Create a client whose requests time out after `timeout`
    pub fn new(timeout: std::time::Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_page(
        &self,
        request: &InventoryRequest,
        page: usize,
    ) -> Result<SubscriptionPage, Error> {
        let url = format!("{}{SUBSCRIPTIONS_PATH}", request.base_url);

        let mut query = vec![
            ("page", page.to_string()),
            ("size", request.page_size.to_string()),
        ];
        if let Some(search) = &request.search {
            query.push(("search", search.clone()));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(&request.token)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::fetch_transient(None, format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            Error::fetch_transient(Some(status), format!("failed to read body: {e}"))
        })?;

        parse_page(status, &body)
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    #[instrument(skip(self, request), fields(base_url = %request.base_url, page_size = request.page_size))]
    async fn fetch_subscriptions(
        &self,
        request: &InventoryRequest,
    ) -> Result<Vec<Subscription>, Error> {
        if request.page_size == 0 {
            return Err(Error::validation("page size must be positive"));
        }

        let mut subscriptions = Vec::new();
        let mut page = 1;

        loop {
            let listing = self.fetch_page(request, page).await?;
            let received = listing.items.len();
            subscriptions.extend(listing.items);

            debug!(page, received, total = listing.total, "fetched subscription page");

            // Only a short page ends the listing; `total` may be stale
            if received < request.page_size {
                break;
            }
            page += 1;
        }

        Ok(subscriptions)
    }
}

/// Turn one inventory response into a page or a classified error
pub fn parse_page(status: u16, body: &[u8]) -> Result<SubscriptionPage, Error> {
    if !(200..300).contains(&status) {
        let parsed: OcmErrorBody = serde_json::from_slice(body).map_err(|e| {
            Error::malformed(
                "inventory",
                format!("HTTP {status}: unparseable error body: {e}"),
                body,
            )
        })?;

        if parsed.reason.is_empty() {
            return Err(Error::malformed(
                "inventory",
                format!("HTTP {status}: error body lacks reason"),
                body,
            ));
        }

        let message = if parsed.code.is_empty() {
            parsed.reason
        } else {
            format!("{}: {}", parsed.code, parsed.reason)
        };
        return Err(Error::fetch_transient(Some(status), message));
    }

    serde_json::from_slice(body).map_err(|e| Error::malformed("inventory", e.to_string(), body))
}
