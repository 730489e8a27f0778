//! # Reconciler
//!
//! One measure-plan-converge pass for a single HotStandbyDeployment.

use crate::cluster::ClusterApi;
use crate::controller::ControllerMetrics;
use crate::crds::{HotStandbyDeployment, HotStandbyDeploymentStatus};
use crate::error::{Error, Result};
use crate::occupancy;
use crate::planner::{self, ReplicaBounds};
use crate::probe::HttpProber;
use crate::workload::{self, ChildWorkload};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why a reconcile pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Create,
    Update,
    /// First pass after this process started
    Resume,
    /// Periodic drift correction
    Timer,
}

impl Trigger {
    /// Classify a pass from the resource's status and whether this process
    /// has reconciled the object before.
    pub fn infer(hsd: &HotStandbyDeployment, first_seen: bool) -> Self {
        match &hsd.status {
            None => Trigger::Create,
            Some(status) if Some(status.observed_generation) != hsd.metadata.generation => {
                Trigger::Update
            }
            Some(_) if first_seen => Trigger::Resume,
            Some(_) => Trigger::Timer,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Trigger::Create => "create",
            Trigger::Update => "update",
            Trigger::Resume => "resume",
            Trigger::Timer => "timer",
        };
        f.write_str(s)
    }
}

/// Reconciler for HotStandbyDeployment resources
pub struct HotStandbyReconciler {
    cluster: Arc<dyn ClusterApi>,
    prober: Arc<dyn HttpProber>,
    metrics: Arc<ControllerMetrics>,
}

impl HotStandbyReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, prober: Arc<dyn HttpProber>) -> Self {
        Self::with_metrics(cluster, prober, Arc::new(ControllerMetrics::default()))
    }

    pub fn with_metrics(
        cluster: Arc<dyn ClusterApi>,
        prober: Arc<dyn HttpProber>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            cluster,
            prober,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Run one pass for `trigger`. Timer-triggered failures are recorded as
    /// a warning event and yield `Ok(None)`; other triggers return the error.
    pub async fn dispatch(
        &self,
        trigger: Trigger,
        hsd: &HotStandbyDeployment,
    ) -> Result<Option<HotStandbyDeploymentStatus>> {
        self.metrics.record_reconcile();
        match self.reconcile_once(hsd).await {
            Ok(status) => Ok(Some(status)),
            Err(e) if trigger == Trigger::Timer => {
                self.metrics.record_timer_failure();
                warn!(
                    namespace = hsd.metadata.namespace.as_deref().unwrap_or_default(),
                    name = %hsd.name_any(),
                    error = %e,
                    "timer reconcile failed"
                );
                let message = format!("timer reconcile failed: {}", e);
                if let Err(publish_err) = self.cluster.publish_warning(hsd, "ReconcileError", &message).await {
                    warn!(error = %publish_err, "failed to publish reconcile warning event");
                }
                Ok(None)
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }

    /// Measure occupancy, converge the child deployment and scale it.
    #[instrument(skip_all, fields(namespace = hsd.metadata.namespace.as_deref(), name = hsd.metadata.name.as_deref()))]
    pub async fn reconcile_once(&self, hsd: &HotStandbyDeployment) -> Result<HotStandbyDeploymentStatus> {
        let namespace = hsd.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = hsd.metadata.name.clone().ok_or(Error::MissingObjectKey("name"))?;
        let owner = hsd
            .controller_owner_ref(&())
            .map(|owner| OwnerReference {
                block_owner_deletion: Some(true),
                ..owner
            })
            .ok_or(Error::MissingObjectKey("uid"))?;

        let spec = &hsd.spec;
        let selector = &spec.selector.match_labels;
        let bounds = ReplicaBounds::new(spec.min_replicas, spec.max_replicas);
        if bounds.is_inverted() {
            self.warn_inverted_bounds(hsd, bounds).await;
        }

        let child = ChildWorkload::new(
            owner,
            workload::child_name(&name),
            namespace.clone(),
            selector.clone(),
            &spec.pod_template,
            planner::initial_replicas(spec.idle_target, bounds),
        );
        let deployment = child.ensure(self.cluster.as_ref()).await?;

        let occupancy = occupancy::count(
            self.cluster.as_ref(),
            self.prober.as_ref(),
            &namespace,
            selector,
            &spec.busy_probe,
        )
        .await?;

        let current = workload::current_replicas(&deployment);
        let desired = planner::desired_replicas(occupancy.busy, spec.idle_target, bounds);
        if current != desired {
            info!(from = current, to = desired, busy = occupancy.busy, "scaling pool");
            child.scale(self.cluster.as_ref(), desired).await?;
            self.metrics.record_scale();
        } else {
            debug!(replicas = current, busy = occupancy.busy, "pool already at desired size");
        }

        Ok(HotStandbyDeploymentStatus {
            busy_count: occupancy.busy,
            idle_count: occupancy.idle,
            desired_replicas: desired,
            observed_generation: hsd.metadata.generation.unwrap_or(0),
        })
    }

    async fn warn_inverted_bounds(&self, hsd: &HotStandbyDeployment, bounds: ReplicaBounds) {
        let message = format!(
            "maxReplicas ({}) is below minReplicas ({}); replicas are pinned to maxReplicas",
            bounds.max.unwrap_or_default(),
            bounds.min.unwrap_or_default()
        );
        warn!("{}", message);
        if let Err(e) = self.cluster.publish_warning(hsd, "InvalidReplicaBounds", &message).await {
            warn!(error = %e, "failed to publish bounds warning event");
        }
    }
}
