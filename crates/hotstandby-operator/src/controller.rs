//! # Kubernetes Controller
//!
//! Wires the reconciler into kube-runtime. The runtime never runs two
//! reconciles for the same object at once; every successful pass requeues
//! after the resync interval, which doubles as the drift-correction timer.

use crate::crds::{HotStandbyDeployment, HotStandbyDeploymentStatus};
use crate::error::{Error, Result};
use crate::reconciler::{HotStandbyReconciler, Trigger};
use crate::cluster::MANAGER_NAME;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams, PostParams, ResourceExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, CustomResourceExt};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Controller for HotStandbyDeployment resources
pub struct HotStandbyController {
    client: Client,
    reconciler: Arc<HotStandbyReconciler>,
    config: ControllerConfig,
}

/// Shared state handed to every reconcile call
pub struct Context {
    reconciler: Arc<HotStandbyReconciler>,
    status_updater: StatusUpdater,
    config: ControllerConfig,
    seen: SeenObjects,
}

/// uids reconciled at least once by this process. Entries are dropped once
/// their resource starts deleting.
#[derive(Debug, Default)]
pub struct SeenObjects {
    uids: Mutex<HashSet<String>>,
}

impl SeenObjects {
    /// True the first time a uid is reported.
    pub fn first_seen(&self, uid: &str) -> bool {
        match self.uids.lock() {
            Ok(mut uids) => uids.insert(uid.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(uid.to_string()),
        }
    }

    pub fn forget(&self, uid: &str) {
        match self.uids.lock() {
            Ok(mut uids) => uids.remove(uid),
            Err(poisoned) => poisoned.into_inner().remove(uid),
        };
    }

    pub fn len(&self) -> usize {
        match self.uids.lock() {
            Ok(uids) => uids.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HotStandbyController {
    /// Create a new controller instance
    pub fn new(client: Client, reconciler: Arc<HotStandbyReconciler>, config: ControllerConfig) -> Self {
        Self {
            client,
            reconciler,
            config,
        }
    }

    /// Run the controller until its watch streams end
    pub async fn run(self) -> Result<()> {
        info!(
            namespace = self.config.namespace.as_deref().unwrap_or("<all>"),
            resync = ?self.config.resync_interval,
            "Starting HotStandbyDeployment controller"
        );

        let (hsds, deployments): (Api<HotStandbyDeployment>, Api<Deployment>) = match &self.config.namespace {
            Some(ns) => (
                Api::namespaced(self.client.clone(), ns),
                Api::namespaced(self.client.clone(), ns),
            ),
            None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
        };

        let context = Arc::new(Context {
            reconciler: Arc::clone(&self.reconciler),
            status_updater: StatusUpdater::new(self.client.clone()),
            config: self.config.clone(),
            seen: SeenObjects::default(),
        });

        Controller::new(hsds, watcher::Config::default())
            .owns(deployments, watcher::Config::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!(object = %obj.name, "reconciled"),
                    Err(e) => debug!(error = %e, "controller event"),
                }
            })
            .await;

        info!("Controller stream ended");
        Ok(())
    }
}

async fn reconcile(hsd: Arc<HotStandbyDeployment>, ctx: Arc<Context>) -> Result<Action> {
    let uid = hsd.uid().ok_or(Error::MissingObjectKey("uid"))?;
    if hsd.metadata.deletion_timestamp.is_some() {
        // the child deployment goes with it through its owner reference
        ctx.seen.forget(&uid);
        debug!(name = %hsd.name_any(), "resource is being deleted");
        return Ok(Action::await_change());
    }
    let trigger = Trigger::infer(&hsd, ctx.seen.first_seen(&uid));
    debug!(name = %hsd.name_any(), %trigger, "reconcile triggered");

    if let Some(status) = ctx.reconciler.dispatch(trigger, &hsd).await? {
        ctx.status_updater.update_status(&hsd, &status).await?;
    }
    Ok(Action::requeue(ctx.config.resync_interval))
}

fn error_policy(hsd: Arc<HotStandbyDeployment>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        name = %hsd.name_any(),
        namespace = hsd.metadata.namespace.as_deref().unwrap_or_default(),
        kind = err.kind(),
        error = %err,
        "Reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue)
}

/// Install the CRD if it doesn't exist
pub async fn install_crd(client: Client) -> Result<()> {
    let crd = HotStandbyDeployment::crd();
    let name = crd.name_any();
    let crds: Api<CustomResourceDefinition> = Api::all(client);

    match crds.get_opt(&name).await? {
        Some(_) => info!("CRD {} already exists", name),
        None => {
            info!("Installing CRD {}", name);
            crds.create(&PostParams::default(), &crd).await?;
            info!("CRD {} installed successfully", name);
        }
    }
    Ok(())
}

/// Reconcile counters, exposed on `/metrics`
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    reconciliations_total: AtomicU64,
    reconciliations_failed: AtomicU64,
    timer_failures: AtomicU64,
    scale_patches: AtomicU64,
    last_reconcile: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`ControllerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub reconciliations_total: u64,
    pub reconciliations_failed: u64,
    pub timer_failures: u64,
    pub scale_patches: u64,
    pub last_reconcile: Option<DateTime<Utc>>,
}

impl ControllerMetrics {
    pub fn record_reconcile(&self) {
        self.reconciliations_total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_reconcile.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn record_failure(&self) {
        self.reconciliations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timer_failure(&self) {
        self.timer_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scale(&self) {
        self.scale_patches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconciliations_total: self.reconciliations_total.load(Ordering::Relaxed),
            reconciliations_failed: self.reconciliations_failed.load(Ordering::Relaxed),
            timer_failures: self.timer_failures.load(Ordering::Relaxed),
            scale_patches: self.scale_patches.load(Ordering::Relaxed),
            last_reconcile: self.last_reconcile.lock().ok().and_then(|last| *last),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch, all namespaces when `None`
    pub namespace: Option<String>,

    /// Requeue interval after a successful reconcile (the periodic timer)
    pub resync_interval: Duration,

    /// Requeue interval for failed reconciliations
    pub error_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_interval: Duration::from_secs(10),
            error_requeue: Duration::from_secs(30),
        }
    }
}

/// Writes reconcile results to the status subresource
pub struct StatusUpdater {
    client: Client,
}

impl StatusUpdater {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Merge-patch the resource status
    pub async fn update_status(
        &self,
        hsd: &HotStandbyDeployment,
        status: &HotStandbyDeploymentStatus,
    ) -> Result<()> {
        let namespace = hsd.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<HotStandbyDeployment> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams {
            field_manager: Some(MANAGER_NAME.to_string()),
            ..Default::default()
        };

        if let Err(e) = api
            .patch_status(&hsd.name_any(), &params, &Patch::Merge(json!({ "status": status })))
            .await
        {
            error!(name = %hsd.name_any(), %namespace, error = %e, "Failed to update status");
            return Err(e.into());
        }

        debug!(
            name = %hsd.name_any(),
            %namespace,
            busy = status.busy_count,
            idle = status.idle_count,
            desired = status.desired_replicas,
            "Updated status"
        );
        Ok(())
    }
}
