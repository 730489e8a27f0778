//! In-memory fakes for the cluster API and the HTTP prober

#![allow(dead_code)]

use async_trait::async_trait;
use hotstandby_operator::cluster::ClusterApi;
use hotstandby_operator::probe::{HttpProber, ProbeError};
use hotstandby_operator::{Error, HotStandbyDeployment, HotStandbyDeploymentSpec, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListPods,
    Get(String),
    Create(String),
    Patch(String, Value),
}

#[derive(Default)]
struct State {
    deployments: BTreeMap<(String, String), Deployment>,
    pods: Vec<Pod>,
    calls: Vec<Call>,
    events: Vec<(String, String)>,
    fail_reads: bool,
}

/// Records every call and applies creates and patches to an in-memory store
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().events.clone()
    }

    /// Patches that only touch `spec.replicas`
    pub fn scale_patches(calls: &[Call]) -> Vec<i64> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Patch(_, body) => {
                    let spec = body.get("spec")?;
                    if spec.get("template").is_some() {
                        return None;
                    }
                    spec.get("replicas")?.as_i64()
                }
                _ => None,
            })
            .collect()
    }

    pub fn template_patches(calls: &[Call]) -> usize {
        calls
            .iter()
            .filter(|call| matches!(call, Call::Patch(_, body) if body["spec"].get("template").is_some()))
            .count()
    }

    pub fn creates(calls: &[Call]) -> usize {
        calls.iter().filter(|call| matches!(call, Call::Create(_))).count()
    }
}

fn api_failure(message: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn matches_selector(pod: &Pod, selector: &BTreeMap<String, String>) -> bool {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListPods);
        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| matches_selector(pod, selector))
            .cloned()
            .collect())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get(name.to_string()));
        if state.fail_reads {
            return Err(api_failure("etcdserver: request timed out"));
        }
        Ok(state
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment> {
        let mut state = self.state.lock().unwrap();
        let name = deployment.metadata.name.clone().unwrap_or_default();
        state.calls.push(Call::Create(name.clone()));
        state
            .deployments
            .insert((namespace.to_string(), name), deployment.clone());
        Ok(deployment.clone())
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &Value) -> Result<Deployment> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Patch(name.to_string(), patch.clone()));
        let key = (namespace.to_string(), name.to_string());
        let deployment = state
            .deployments
            .get_mut(&key)
            .ok_or_else(|| api_failure("patch of missing deployment"))?;
        let spec = deployment.spec.get_or_insert_with(Default::default);

        if let Some(replicas) = patch["spec"].get("replicas").and_then(Value::as_i64) {
            spec.replicas = Some(replicas as i32);
        }
        if let Some(template) = patch["spec"].get("template") {
            spec.template = serde_json::from_value(template.clone()).map_err(Error::InvalidPodTemplate)?;
        }
        if let Some(labels) = patch["spec"]["selector"].get("matchLabels") {
            spec.selector.match_labels =
                Some(serde_json::from_value(labels.clone()).map_err(Error::InvalidPodTemplate)?);
        }
        Ok(deployment.clone())
    }

    async fn publish_warning(&self, _hsd: &HotStandbyDeployment, reason: &str, message: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .events
            .push((reason.to_string(), message.to_string()));
        Ok(())
    }
}

/// Answers probe URLs from a fixed table; unknown URLs time out
#[derive(Default)]
pub struct FakeProber {
    answers: HashMap<String, u16>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, url: &str, code: u16) -> Self {
        self.answers.insert(url.to_string(), code);
        self
    }
}

#[async_trait]
impl HttpProber for FakeProber {
    async fn get_status(&self, url: &str, timeout: Duration) -> std::result::Result<u16, ProbeError> {
        self.answers.get(url).copied().ok_or(ProbeError::Timeout(timeout))
    }
}

pub fn manager(spec: HotStandbyDeploymentSpec) -> HotStandbyDeployment {
    let mut hsd = HotStandbyDeployment::new("pool", spec);
    hsd.metadata.namespace = Some("default".to_string());
    hsd.metadata.uid = Some("0b3c6d8e-uid".to_string());
    hsd.metadata.generation = Some(1);
    hsd
}

pub fn worker_selector() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "worker".to_string())])
}

pub fn pod(name: &str, busy: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            labels: Some(worker_selector()),
            annotations: busy.map(|v| BTreeMap::from([("paia.tech/busy".to_string(), v.to_string())])),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn running_pod(name: &str, ip: &str) -> Pod {
    let mut pod = pod(name, None);
    pod.status = Some(PodStatus {
        phase: Some("Running".to_string()),
        pod_ip: Some(ip.to_string()),
        ..Default::default()
    });
    pod
}

pub fn deleting(mut pod: Pod) -> Pod {
    pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    pod
}
