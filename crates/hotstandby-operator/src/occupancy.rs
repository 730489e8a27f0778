//! # Occupancy Counter
//!
//! Counts busy and idle pods of a pool.

use crate::cluster::ClusterApi;
use crate::crds::BusyProbeSpec;
use crate::error::Result;
use crate::probe::{self, HttpProber};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub busy: u32,
    pub idle: u32,
}

impl Occupancy {
    /// Builds counts from eligible pod total and busy verdicts.
    pub fn from_counts(total: usize, busy: usize) -> Self {
        let total = u32::try_from(total).unwrap_or(u32::MAX);
        let busy = u32::try_from(busy).unwrap_or(u32::MAX);
        Self {
            busy,
            idle: total.saturating_sub(busy),
        }
    }
}

/// Pods that count as capacity: anything not already being deleted.
pub fn is_eligible(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
}

/// Lists the pool's pods and probes them one by one.
pub async fn count(
    cluster: &dyn ClusterApi,
    prober: &dyn HttpProber,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    busy_probe: &BusyProbeSpec,
) -> Result<Occupancy> {
    let pods = cluster.list_pods(namespace, selector).await?;
    let eligible: Vec<&Pod> = pods.iter().filter(|pod| is_eligible(pod)).collect();

    let mut busy = 0usize;
    for pod in &eligible {
        let verdict = probe::is_busy(pod, busy_probe, prober).await;
        debug!(pod = pod.metadata.name.as_deref().unwrap_or_default(), busy = verdict, "probed pod");
        if verdict {
            busy += 1;
        }
    }

    Ok(Occupancy::from_counts(eligible.len(), busy))
}
