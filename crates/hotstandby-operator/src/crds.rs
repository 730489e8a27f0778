//! # Custom Resource Definitions
//!
//! The `HotStandbyDeployment` resource: a declared pool of worker pods whose
//! idle headroom the operator keeps near `idleTarget`.

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group of the custom resource
pub const GROUP: &str = "apps.paia.tech";

/// Annotation read by the annotation probe when `annotationKey` is not set
pub const DEFAULT_BUSY_ANNOTATION: &str = "paia.tech/busy";

/// HotStandbyDeployment CRD - one per hot-standby pool
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "apps.paia.tech",
    version = "v1alpha1",
    kind = "HotStandbyDeployment",
    plural = "hotstandbydeployments",
    shortname = "hsd",
    namespaced
)]
#[kube(status = "HotStandbyDeploymentStatus")]
#[kube(printcolumn = r#"{"name":"Busy","type":"integer","jsonPath":".status.busyCount"}"#)]
#[kube(printcolumn = r#"{"name":"Idle","type":"integer","jsonPath":".status.idleCount"}"#)]
#[kube(printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".status.desiredReplicas"}"#)]
#[serde(rename_all = "camelCase")]
pub struct HotStandbyDeploymentSpec {
    /// Number of idle pods to keep on hand above the busy ones
    #[serde(default)]
    pub idle_target: u32,

    /// Lower bound on the total replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    /// Upper bound on the total replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,

    /// Member pod selector, also used as the child deployment's selector
    #[serde(default)]
    pub selector: PoolSelector,

    /// Pod template run by the child deployment. Only its labels are touched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: serde_json::Value,

    /// How busy pods are detected
    #[serde(default)]
    pub busy_probe: BusyProbeSpec,
}

/// Exact-match label selector
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Busy probe configuration
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BusyProbeSpec {
    #[serde(default)]
    pub mode: ProbeMode,

    /// Annotation consulted in `annotation` mode
    #[serde(default = "default_annotation_key")]
    pub annotation_key: String,

    /// Endpoint consulted in `http` mode
    #[serde(default)]
    pub http: HttpProbeSpec,
}

impl Default for BusyProbeSpec {
    fn default() -> Self {
        Self {
            mode: ProbeMode::default(),
            annotation_key: default_annotation_key(),
            http: HttpProbeSpec::default(),
        }
    }
}

impl BusyProbeSpec {
    /// The annotation to read, treating an empty key as unset.
    pub fn effective_annotation_key(&self) -> &str {
        if self.annotation_key.is_empty() {
            DEFAULT_BUSY_ANNOTATION
        } else {
            &self.annotation_key
        }
    }
}

fn default_annotation_key() -> String {
    DEFAULT_BUSY_ANNOTATION.to_string()
}

/// Probe strategy
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    #[default]
    Annotation,
    Http,
}

/// HTTP probe settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpProbeSpec {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Accepted for compatibility; probes run once per reconcile.
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u64,

    /// Whether a 2xx answer means busy (true) or idle (false)
    #[serde(default = "default_true")]
    pub success_is_busy: bool,
}

impl Default for HttpProbeSpec {
    fn default() -> Self {
        Self {
            port: default_port(),
            path: default_path(),
            timeout_seconds: default_timeout_seconds(),
            period_seconds: default_period_seconds(),
            success_is_busy: default_true(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_path() -> String {
    "/busy".to_string()
}

fn default_timeout_seconds() -> u64 {
    1
}

fn default_period_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Status written after every successful reconcile
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HotStandbyDeploymentStatus {
    pub busy_count: u32,
    pub idle_count: u32,
    pub desired_replicas: i32,
    pub observed_generation: i64,
}

fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".to_string(), serde_json::json!(true));
    Schema::Object(schema)
}
