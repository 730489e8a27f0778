//! # Child Workload
//!
//! The Deployment owned by each HotStandbyDeployment. `ensure` creates it or
//! converges its selector and template; `scale` touches replicas only, so a
//! template change never resets the replica count.

use crate::cluster::ClusterApi;
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Label carrying the owning HotStandbyDeployment's name
pub const OWNER_NAME_LABEL: &str = "hsd.paia.tech/name";

/// Deterministic child deployment name for a manager resource.
pub fn child_name(manager_name: &str) -> String {
    format!("{}-workload", manager_name)
}

/// Copy of `template` with the selector labels forced into
/// `metadata.labels`. Selector labels win on collision.
pub fn merge_template_labels(template: &Value, selector: &BTreeMap<String, String>) -> Value {
    let mut root = match template {
        Value::Object(map) if !map.is_empty() => map.clone(),
        _ => Map::from_iter([
            ("metadata".to_string(), json!({})),
            ("spec".to_string(), json!({})),
        ]),
    };

    let mut metadata = take_object(&mut root, "metadata");
    let mut labels = take_object(&mut metadata, "labels");
    for (key, value) in selector {
        labels.insert(key.clone(), Value::String(value.clone()));
    }
    metadata.insert("labels".to_string(), Value::Object(labels));
    root.insert("metadata".to_string(), Value::Object(metadata));

    Value::Object(root)
}

fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(inner)) => inner,
        _ => Map::new(),
    }
}

/// Replica count as last written to the deployment spec.
pub fn current_replicas(deployment: &Deployment) -> i32 {
    deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

/// Desired shape of one child deployment
#[derive(Debug, Clone)]
pub struct ChildWorkload {
    pub name: String,
    pub namespace: String,
    pub owner: OwnerReference,
    pub selector: BTreeMap<String, String>,
    /// Pod template with selector labels already merged in
    pub template: Value,
    pub initial_replicas: i32,
}

impl ChildWorkload {
    pub fn new(
        owner: OwnerReference,
        name: String,
        namespace: String,
        selector: BTreeMap<String, String>,
        pod_template: &Value,
        initial_replicas: i32,
    ) -> Self {
        let template = merge_template_labels(pod_template, &selector);
        Self {
            name,
            namespace,
            owner,
            selector,
            template,
            initial_replicas,
        }
    }

    /// Full object for the create call.
    pub fn to_deployment(&self) -> Result<Deployment> {
        let template: PodTemplateSpec =
            serde_json::from_value(self.template.clone()).map_err(Error::InvalidPodTemplate)?;

        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    OWNER_NAME_LABEL.to_string(),
                    self.owner.name.clone(),
                )])),
                owner_references: Some(vec![self.owner.clone()]),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.initial_replicas),
                selector: LabelSelector {
                    match_labels: Some(self.selector.clone()),
                    ..Default::default()
                },
                template,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Selector and template patch for an existing deployment.
    pub fn convergence_patch(&self) -> Value {
        json!({
            "spec": {
                "selector": { "matchLabels": self.selector },
                "template": self.template,
            }
        })
    }

    /// Create the deployment if absent, otherwise patch selector and
    /// template. Returns the server's view of the object.
    pub async fn ensure(&self, cluster: &dyn ClusterApi) -> Result<Deployment> {
        match cluster.get_deployment(&self.namespace, &self.name).await? {
            None => {
                let deployment = self.to_deployment()?;
                cluster.create_deployment(&self.namespace, &deployment).await?;
                info!(
                    namespace = %self.namespace,
                    deployment = %self.name,
                    replicas = self.initial_replicas,
                    "created child deployment"
                );
                cluster
                    .get_deployment(&self.namespace, &self.name)
                    .await?
                    .ok_or_else(|| Error::Kube(not_found(&self.name)))
            }
            Some(_) => {
                cluster
                    .patch_deployment(&self.namespace, &self.name, &self.convergence_patch())
                    .await
            }
        }
    }

    /// Patch only `spec.replicas`.
    pub async fn scale(&self, cluster: &dyn ClusterApi, replicas: i32) -> Result<Deployment> {
        let patch = json!({ "spec": { "replicas": replicas } });
        let deployment = cluster.patch_deployment(&self.namespace, &self.name, &patch).await?;
        info!(
            namespace = %self.namespace,
            deployment = %self.name,
            replicas,
            "scaled child deployment"
        );
        Ok(deployment)
    }
}

fn not_found(name: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("deployments.apps \"{}\" not found after create", name),
        reason: "NotFound".to_string(),
        code: 404,
    })
}
