//! # Cluster API
//!
//! The narrow slice of the Kubernetes API the reconcile loop talks to. The
//! reconcile code only sees [`ClusterApi`], so it can be driven by the real
//! client or by an in-memory fake.

use crate::crds::HotStandbyDeployment;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::collections::BTreeMap;
use tracing::debug;

/// Field manager / event reporter name
pub const MANAGER_NAME: &str = "hotstandby-operator";

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Pods in `namespace` carrying every `key=value` pair of `selector`.
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>>;

    /// `Ok(None)` when the deployment does not exist.
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment>;

    /// Strategic-merge patch of a deployment.
    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Deployment>;

    /// Attach a `Warning` event to the resource.
    async fn publish_warning(&self, hsd: &HotStandbyDeployment, reason: &str, message: &str) -> Result<()>;
}

/// Render an equality-based label selector (`a=1,b=2`).
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// [`ClusterApi`] backed by a live kube client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    reporter: Reporter,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: MANAGER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self { client, reporter }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&label_selector(selector));
        }
        let pods = api.list(&params).await?;
        debug!(namespace, count = pods.items.len(), "listed pods");
        Ok(pods.items)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(MANAGER_NAME.to_string()),
            ..Default::default()
        };
        Ok(api.create(&params, deployment).await?)
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams {
            field_manager: Some(MANAGER_NAME.to_string()),
            ..Default::default()
        };
        Ok(api.patch(name, &params, &Patch::Strategic(patch)).await?)
    }

    async fn publish_warning(&self, hsd: &HotStandbyDeployment, reason: &str, message: &str) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), hsd.object_ref(&()));
        recorder
            .publish(Event {
                type_: EventType::Warning,
                reason: reason.to_string(),
                note: Some(message.to_string()),
                action: "Reconciling".to_string(),
                secondary: None,
            })
            .await?;
        Ok(())
    }
}
