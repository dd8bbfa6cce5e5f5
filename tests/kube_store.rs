//! Store clients against a mock API server
//!
//! The kube clients map API status codes onto pass semantics: a duplicate
//! create and a missing delete are success, a conflicting replace or managed
//! patch is a `WriteConflict`. These run the real `kube::Client` against
//! wiremock so that mapping is exercised end to end.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use discovery_operator::controller::{
    KubeClient, KubeClientImpl, ManagedKubeClient, ManagedKubeClientImpl,
};
use discovery_operator::crd::{
    DiscoveredCluster, DiscoveredClusterSpec, DiscoveryConfig, DiscoveryConfigSpec,
};
use discovery_operator::Error;

const NS: &str = "open-cluster-management";
const COLLECTION: &str =
    "/apis/discovery.open-cluster-management.io/v1/namespaces/open-cluster-management/discoveredclusters";

fn kube_client(server: &MockServer) -> kube::Client {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    kube::Client::try_from(kube::Config::new(server.uri().parse().unwrap())).unwrap()
}

fn item_path(name: &str) -> String {
    format!("{COLLECTION}/{name}")
}

/// An API server `Status` failure body
fn status(code: u16, reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("simulated {reason}"),
        "reason": reason,
        "code": code
    }))
}

fn cluster(name: &str) -> DiscoveredCluster {
    let mut config = DiscoveryConfig::new("discovery", DiscoveryConfigSpec::default());
    config.metadata.namespace = Some(NS.to_string());
    config.metadata.uid = Some("6c1d2b0e-4a8e-4d8f-9a51-1f0c7b7f2e10".to_string());

    let mut cluster = DiscoveredCluster::owned_by(
        &config,
        DiscoveredClusterSpec {
            name: name.to_string(),
            ..Default::default()
        },
    );
    cluster.metadata.resource_version = Some("17".to_string());
    cluster
}

#[tokio::test]
async fn duplicate_create_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COLLECTION))
        .respond_with(status(409, "AlreadyExists"))
        .expect(1)
        .mount(&server)
        .await;

    let store = KubeClientImpl::new(kube_client(&server));
    store.create_discovered(&cluster("c1")).await.unwrap();
}

#[tokio::test]
async fn failed_create_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COLLECTION))
        .respond_with(status(500, "InternalError"))
        .mount(&server)
        .await;

    let store = KubeClientImpl::new(kube_client(&server));
    let err = store.create_discovered(&cluster("c1")).await.unwrap_err();
    assert!(matches!(err, Error::Kube { .. }), "{err}");
}

#[tokio::test]
async fn conflicting_replace_is_write_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(item_path("c1")))
        .respond_with(status(409, "Conflict"))
        .expect(1)
        .mount(&server)
        .await;

    let store = KubeClientImpl::new(kube_client(&server));
    let err = store.replace_discovered(&cluster("c1")).await.unwrap_err();

    assert!(matches!(&err, Error::WriteConflict { name } if name == "c1"), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn deleting_a_missing_record_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(item_path("gone")))
        .respond_with(status(404, "NotFound"))
        .expect(1)
        .mount(&server)
        .await;

    let store = KubeClientImpl::new(kube_client(&server));
    store.delete_discovered(NS, "gone").await.unwrap();
}

#[tokio::test]
async fn forbidden_delete_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(item_path("c1")))
        .respond_with(status(403, "Forbidden"))
        .mount(&server)
        .await;

    let store = KubeClientImpl::new(kube_client(&server));
    let err = store.delete_discovered(NS, "c1").await.unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn conflicting_managed_patch_is_write_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(item_path("c1")))
        .respond_with(status(409, "Conflict"))
        .expect(1)
        .mount(&server)
        .await;

    let overlay = ManagedKubeClientImpl::new(kube_client(&server));
    let err = overlay.set_managed(&cluster("c1"), true).await.unwrap_err();

    assert!(matches!(&err, Error::WriteConflict { name } if name == "c1"), "{err}");
}
