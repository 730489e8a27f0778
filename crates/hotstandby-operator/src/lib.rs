//! # Hot-Standby Operator
//!
//! Kubernetes operator that keeps a pool of worker pods sized so that a
//! configured number of them stay idle while busy pods are never removed.
//! Each `HotStandbyDeployment` owns one Deployment whose replica count is
//! recomputed from probed occupancy on every reconcile.

pub mod cluster;
pub mod controller;
pub mod crds;
pub mod error;
pub mod manager;
pub mod occupancy;
pub mod planner;
pub mod probe;
pub mod reconciler;
pub mod workload;

pub use cluster::{ClusterApi, KubeClusterApi};
pub use controller::*;
pub use crds::*;
pub use error::{Error, Result};
pub use manager::*;
pub use reconciler::{HotStandbyReconciler, Trigger};

use std::net::SocketAddr;
use std::time::Duration;

/// Operator configuration
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch, all namespaces when `None`
    pub namespace: Option<String>,
    /// Interval of the periodic drift-correction reconcile
    pub resync_interval: Duration,
    /// Requeue interval for failed reconciliations
    pub error_requeue: Duration,
    /// Bind address of the health and metrics server
    pub health_addr: SocketAddr,
    /// Create the CRD at startup when it is missing
    pub install_crd: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_interval: Duration::from_secs(10),
            error_requeue: Duration::from_secs(30),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            install_crd: false,
        }
    }
}

impl OperatorConfig {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            namespace: self.namespace.clone(),
            resync_interval: self.resync_interval,
            error_requeue: self.error_requeue,
        }
    }
}
