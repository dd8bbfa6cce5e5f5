//! DiscoveryConfig controller implementation
//!
//! Each pass resolves the unit's credential, exchanges it for a token, lists
//! the OCM inventory and makes the namespace's DiscoveredClusters equal to the
//! filtered, translated result. A credential that is gone or rejected for good
//! removes every DiscoveredCluster in the namespace; remote hiccups leave them
//! untouched until the next attempt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{CredentialRef, DiscoveredCluster, DiscoveredClusterSpec, DiscoveryConfig};
use crate::metrics::{self, PassOutcome};
use crate::ocm::credentials::{self, AuthRequest, AUTH_METHOD_KEY};
use crate::ocm::{
    canonical_set, filters, HttpInventoryClient, HttpTokenExchanger, InventoryClient,
    InventoryRequest, TokenExchanger,
};
use crate::settings::DiscoverySettings;
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting the Kubernetes operations of a discovery pass
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Read a credential secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Persist an `auth_method` value into a credential secret
    async fn set_secret_auth_method(
        &self,
        namespace: &str,
        name: &str,
        method: &str,
    ) -> Result<(), Error>;

    /// List the DiscoveredClusters in a namespace
    async fn list_discovered(&self, namespace: &str) -> Result<Vec<DiscoveredCluster>, Error>;

    /// Create a DiscoveredCluster; an existing one with the same name is success
    async fn create_discovered(&self, cluster: &DiscoveredCluster) -> Result<(), Error>;

    /// Replace a DiscoveredCluster, failing with `WriteConflict` if it changed
    /// since it was read
    async fn replace_discovered(&self, cluster: &DiscoveredCluster) -> Result<(), Error>;

    /// Delete a DiscoveredCluster; a missing one is success
    async fn delete_discovered(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Count DiscoveryConfigs across all namespaces
    async fn count_discovery_configs(&self) -> Result<usize, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn is_api_code(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn set_secret_auth_method(
        &self,
        namespace: &str,
        name: &str,
        method: &str,
    ) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "stringData": { AUTH_METHOD_KEY: method }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_discovered(&self, namespace: &str) -> Result<Vec<DiscoveredCluster>, Error> {
        let api: Api<DiscoveredCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_discovered(&self, cluster: &DiscoveredCluster) -> Result<(), Error> {
        let namespace = cluster.namespace().unwrap_or_default();
        let api: Api<DiscoveredCluster> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), cluster).await {
            Ok(_) => Ok(()),
            Err(e) if is_api_code(&e, 409) => {
                debug!(cluster = %cluster.name_any(), "discovered cluster already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_discovered(&self, cluster: &DiscoveredCluster) -> Result<(), Error> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<DiscoveredCluster> = Api::namespaced(self.client.clone(), &namespace);
        match api.replace(&name, &PostParams::default(), cluster).await {
            Ok(_) => Ok(()),
            Err(e) if is_api_code(&e, 409) => Err(Error::write_conflict(name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_discovered(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<DiscoveredCluster> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_api_code(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn count_discovery_configs(&self) -> Result<usize, Error> {
        let api: Api<DiscoveryConfig> = Api::all(self.client.clone());
        Ok(api.list_metadata(&ListParams::default()).await?.items.len())
    }
}

/// Controller context for DiscoveryConfig reconciliation
///
/// Holds the store and OCM clients behind traits so passes can run against
/// mocks. Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .settings(settings)
///     .overlay_nudge(nudge)
///     .build()?;
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Token endpoint client
    pub tokens: Arc<dyn TokenExchanger>,
    /// Inventory endpoint client
    pub inventory: Arc<dyn InventoryClient>,
    /// Base URLs, page size and intervals
    pub settings: DiscoverySettings,
    /// Wakes the managed overlay after every applied pass
    pub overlay_nudge: Arc<Notify>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        tokens: Arc<dyn TokenExchanger>,
        inventory: Arc<dyn InventoryClient>,
    ) -> Self {
        Self {
            kube,
            tokens,
            inventory,
            settings: DiscoverySettings::default(),
            overlay_nudge: Arc::new(Notify::new()),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    settings: DiscoverySettings,
    overlay_nudge: Option<Arc<Notify>>,
    kube: Option<Arc<dyn KubeClient>>,
    tokens: Option<Arc<dyn TokenExchanger>>,
    inventory: Option<Arc<dyn InventoryClient>>,
}

impl ContextBuilder {
    /// Create a new builder with the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            settings: DiscoverySettings::default(),
            overlay_nudge: None,
            kube: None,
            tokens: None,
            inventory: None,
        }
    }

    /// Override the default settings
    pub fn settings(mut self, settings: DiscoverySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a nudge with the managed overlay
    pub fn overlay_nudge(mut self, nudge: Arc<Notify>) -> Self {
        self.overlay_nudge = Some(nudge);
        self
    }

    /// Override the Kubernetes client (for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the token exchanger
    pub fn token_exchanger(mut self, tokens: Arc<dyn TokenExchanger>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Override the inventory client
    pub fn inventory_client(mut self, inventory: Arc<dyn InventoryClient>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Build the Context
    pub fn build(self) -> Result<Context, Error> {
        let timeout = self.settings.http_timeout;
        let tokens = match self.tokens {
            Some(t) => t,
            None => Arc::new(HttpTokenExchanger::new(timeout)?),
        };
        let inventory = match self.inventory {
            Some(i) => i,
            None => Arc::new(HttpInventoryClient::new(timeout)?),
        };

        Ok(Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            tokens,
            inventory,
            settings: self.settings,
            overlay_nudge: self.overlay_nudge.unwrap_or_default(),
        })
    }
}

/// Mutations needed to make the existing set equal the canonical set
#[derive(Debug, Default)]
pub struct ChangePlan {
    /// Records to create, owned by the config
    pub create: Vec<DiscoveredCluster>,
    /// Existing records carrying their new spec
    pub update: Vec<DiscoveredCluster>,
    /// Names of records no longer in the inventory
    pub delete: Vec<String>,
    /// Records already up to date
    pub unchanged: usize,
}

impl ChangePlan {
    /// Whether applying the plan writes nothing
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Diff the canonical set against the existing records
///
/// Updates keep the existing object's metadata (resourceVersion, owner
/// references, labels) and its managed flag, which the overlay owns.
pub fn plan_changes(
    config: &DiscoveryConfig,
    mut canonical: BTreeMap<String, DiscoveredClusterSpec>,
    existing: Vec<DiscoveredCluster>,
) -> ChangePlan {
    let mut plan = ChangePlan::default();

    for current in existing {
        let name = current.name_any();
        match canonical.remove(&name) {
            Some(desired) if desired.same_as(&current.spec) => plan.unchanged += 1,
            Some(desired) => {
                let mut updated = current;
                let managed = updated.spec.is_managed_cluster;
                updated.spec = DiscoveredClusterSpec {
                    is_managed_cluster: managed,
                    ..desired
                };
                plan.update.push(updated);
            }
            None => plan.delete.push(name),
        }
    }

    plan.create = canonical
        .into_values()
        .map(|spec| DiscoveredCluster::owned_by(config, spec))
        .collect();

    plan
}

/// Apply a plan: creates, then updates, then deletes
///
/// Stops at the first failure. Mutations already made stay; the rest are
/// picked up by the next pass.
pub async fn apply_plan(plan: &ChangePlan, namespace: &str, ctx: &Context) -> Result<(), Error> {
    for cluster in &plan.create {
        ctx.kube
            .create_discovered(cluster)
            .await
            .map_err(|e| wrap_apply("create", &cluster.name_any(), e))?;
        metrics::record_write("create");
    }

    for cluster in &plan.update {
        ctx.kube
            .replace_discovered(cluster)
            .await
            .map_err(|e| wrap_apply("update", &cluster.name_any(), e))?;
        metrics::record_write("update");
    }

    for name in &plan.delete {
        ctx.kube
            .delete_discovered(namespace, name)
            .await
            .map_err(|e| wrap_apply("delete", name, e))?;
        metrics::record_write("delete");
    }

    Ok(())
}

fn wrap_apply(action: &'static str, name: &str, err: Error) -> Error {
    match err {
        conflict @ Error::WriteConflict { .. } => conflict,
        other => Error::apply_failed(action, name, other),
    }
}

/// Resolve the credential, exchange it and list the inventory
async fn discover(
    config: &DiscoveryConfig,
    namespace: &str,
    ctx: &Context,
) -> Result<BTreeMap<String, DiscoveredClusterSpec>, Error> {
    let secret_name = config.spec.credential.trim();
    if secret_name.is_empty() {
        return Err(Error::credential_unavailable("", "no credential configured"));
    }

    let secret = ctx
        .kube
        .get_secret(namespace, secret_name)
        .await?
        .ok_or_else(|| Error::credential_unavailable(secret_name, "secret not found"))?;

    let fields = credentials::credential_fields(&secret)?;
    let resolved = credentials::resolve(&fields)?;

    if resolved.upgraded {
        info!(secret = %secret_name, "upgrading credential to service-account auth method");
        if let Err(e) = ctx
            .kube
            .set_secret_auth_method(namespace, secret_name, resolved.method.name())
            .await
        {
            warn!(error = %e, secret = %secret_name, "failed to persist auth method");
        }
    }

    let token = ctx
        .tokens
        .exchange(&AuthRequest {
            method: resolved.method,
            base_url: ctx.settings.auth_base_url_for(config),
        })
        .await?;

    let now = Utc::now();
    let filter = &config.spec.filters;
    let subscriptions = ctx
        .inventory
        .fetch_subscriptions(&InventoryRequest {
            token,
            base_url: ctx.settings.ocm_base_url_for(config),
            search: filters::search_term(filter, now),
            page_size: ctx.settings.page_size,
        })
        .await?;

    let fetched = subscriptions.len();
    let credential = CredentialRef {
        name: secret_name.to_string(),
        namespace: namespace.to_string(),
    };
    let canonical = canonical_set(subscriptions, filter, &credential, now);
    debug!(fetched, kept = canonical.len(), "inventory filtered");

    Ok(canonical)
}

async fn delete_all(namespace: &str, ctx: &Context) -> Result<usize, Error> {
    let existing = ctx.kube.list_discovered(namespace).await?;
    let plan = ChangePlan {
        delete: existing.iter().map(|c| c.name_any()).collect(),
        ..Default::default()
    };
    apply_plan(&plan, namespace, ctx).await?;
    Ok(plan.delete.len())
}

async fn run_pass(
    config: &DiscoveryConfig,
    namespace: &str,
    ctx: &Context,
) -> Result<(Action, PassOutcome), Error> {
    match discover(config, namespace, ctx).await {
        Ok(canonical) => {
            let existing = ctx.kube.list_discovered(namespace).await?;
            let plan = plan_changes(config, canonical, existing);
            apply_plan(&plan, namespace, ctx).await?;
            info!(
                created = plan.create.len(),
                updated = plan.update.len(),
                deleted = plan.delete.len(),
                unchanged = plan.unchanged,
                "discovery pass applied"
            );

            ctx.overlay_nudge.notify_one();
            Ok((
                Action::requeue(ctx.settings.refresh_interval),
                PassOutcome::Applied,
            ))
        }
        Err(e) if e.requires_cleanup() => {
            warn!(error = %e, "credential unusable, removing discovered clusters");
            let deleted = delete_all(namespace, ctx).await?;
            info!(deleted, "discovered clusters removed");
            Ok((
                Action::requeue(ctx.settings.refresh_interval),
                PassOutcome::Cleanup,
            ))
        }
        Err(e) if e.is_transient() => {
            warn!(
                error = %e,
                raw_body = e.raw_body().unwrap_or_default(),
                retry_in_secs = ctx.settings.transient_retry_interval.as_secs(),
                "discovery pass aborted, records left unchanged"
            );
            Ok((
                Action::requeue(ctx.settings.transient_retry_interval),
                PassOutcome::Transient,
            ))
        }
        Err(e) => Err(e),
    }
}

async fn refresh_config_gauge(ctx: &Context) {
    match ctx.kube.count_discovery_configs().await {
        Ok(count) => metrics::set_discovery_config_total(count),
        Err(e) => warn!(error = %e, "failed to count discovery configs"),
    }
}

/// Reconcile a DiscoveryConfig
///
/// Returns the delay until the next pass, or an error for `error_policy` when
/// a store operation failed.
#[instrument(skip(config, ctx), fields(config = %config.name_any(), namespace = %config.namespace().unwrap_or_default()))]
pub async fn reconcile(config: Arc<DiscoveryConfig>, ctx: Arc<Context>) -> Result<Action, Error> {
    refresh_config_gauge(&ctx).await;

    if !config.is_reconcilable() {
        info!(
            expected = crate::DISCOVERY_CONFIG_NAME,
            "ignoring DiscoveryConfig with non-conventional name"
        );
        return Ok(Action::await_change());
    }

    if let Err(e) = config.spec.validate() {
        warn!(error = %e, "DiscoveryConfig validation failed");
        // Don't requeue for validation errors - they require spec changes
        return Ok(Action::await_change());
    }

    let Some(namespace) = config.namespace() else {
        return Err(Error::internal("DiscoveryConfig has no namespace"));
    };

    let started = Instant::now();
    let result = run_pass(&config, &namespace, &ctx).await;
    let outcome = result
        .as_ref()
        .map(|(_, outcome)| *outcome)
        .unwrap_or(PassOutcome::Error);
    metrics::record_pass(&namespace, outcome, started.elapsed().as_secs_f64());

    result.map(|(action, _)| action)
}

/// Error policy for the DiscoveryConfig controller
///
/// Store failures are retried after a fixed delay; write conflicts and
/// partially applied passes converge on the retry.
pub fn error_policy(config: Arc<DiscoveryConfig>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        config = %config.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ctx.settings.error_retry_interval)
}
