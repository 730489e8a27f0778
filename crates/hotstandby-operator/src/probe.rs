//! # Busy Probe
//!
//! Decides whether a single pod is currently busy. Every failure path,
//! including timeouts and pods that are not running yet, resolves to "not
//! busy".

use crate::crds::{BusyProbeSpec, HttpProbeSpec, ProbeMode};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe transport error: {0}")]
    Transport(String),
}

/// Issues the single GET an HTTP probe needs and reports the status code.
#[async_trait]
pub trait HttpProber: Send + Sync {
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16, ProbeError>;
}

/// [`HttpProber`] backed by a shared reqwest client
#[derive(Debug, Clone, Default)]
pub struct ReqwestProber {
    client: reqwest::Client,
}

impl ReqwestProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpProber for ReqwestProber {
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16, ProbeError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(timeout)
                } else {
                    ProbeError::Transport(e.to_string())
                }
            })?;
        Ok(response.status().as_u16())
    }
}

/// Busy verdict for one pod under the configured strategy.
pub async fn is_busy(pod: &Pod, probe: &BusyProbeSpec, prober: &dyn HttpProber) -> bool {
    match probe.mode {
        ProbeMode::Annotation => is_busy_by_annotation(pod, probe.effective_annotation_key()),
        ProbeMode::Http => is_busy_by_http(pod, &probe.http, prober).await,
    }
}

/// Busy when the annotation equals `"true"`, ignoring case.
pub fn is_busy_by_annotation(pod: &Pod, key: &str) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub async fn is_busy_by_http(pod: &Pod, http: &HttpProbeSpec, prober: &dyn HttpProber) -> bool {
    let Some(url) = probe_url(pod, http) else {
        return false;
    };
    let timeout = Duration::from_secs(http.timeout_seconds);

    match prober.get_status(&url, timeout).await {
        Ok(code) => {
            let ok = (200..300).contains(&code);
            debug!(%url, code, "busy probe answered");
            if http.success_is_busy {
                ok
            } else {
                !ok
            }
        }
        Err(e) => {
            debug!(%url, error = %e, "busy probe failed, treating pod as idle");
            false
        }
    }
}

/// Probe URL for a running pod with an address, `None` otherwise.
pub fn probe_url(pod: &Pod, http: &HttpProbeSpec) -> Option<String> {
    let status = pod.status.as_ref()?;
    if status.phase.as_deref() != Some("Running") {
        return None;
    }
    let pod_ip = status.pod_ip.as_deref().filter(|ip| !ip.is_empty())?;

    let authority = match pod_ip.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, http.port).to_string(),
        Err(_) => format!("{}:{}", pod_ip, http.port),
    };
    Some(format!("http://{}{}", authority, http.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    struct FixedProber(Result<u16, ()>);

    #[async_trait]
    impl HttpProber for FixedProber {
        async fn get_status(&self, _url: &str, timeout: Duration) -> Result<u16, ProbeError> {
            self.0.map_err(|_| ProbeError::Timeout(timeout))
        }
    }

    fn annotated(value: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("worker-0".to_string()),
                annotations: value.map(|v| BTreeMap::from([("paia.tech/busy".to_string(), v.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn running(ip: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some(ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_annotation_true_any_case() {
        assert!(is_busy_by_annotation(&annotated(Some("true")), "paia.tech/busy"));
        assert!(is_busy_by_annotation(&annotated(Some("TRUE")), "paia.tech/busy"));
        assert!(is_busy_by_annotation(&annotated(Some("True")), "paia.tech/busy"));
    }

    #[test]
    fn test_annotation_other_values_are_idle() {
        assert!(!is_busy_by_annotation(&annotated(None), "paia.tech/busy"));
        assert!(!is_busy_by_annotation(&annotated(Some("TRUE ")), "paia.tech/busy"));
        assert!(!is_busy_by_annotation(&annotated(Some("1")), "paia.tech/busy"));
        assert!(!is_busy_by_annotation(&annotated(Some("false")), "paia.tech/busy"));
        assert!(!is_busy_by_annotation(&annotated(Some("true")), "other/key"));
    }

    #[test]
    fn test_probe_url() {
        let http = HttpProbeSpec::default();
        assert_eq!(probe_url(&running("10.0.0.7"), &http).as_deref(), Some("http://10.0.0.7:8080/busy"));
        assert_eq!(probe_url(&running("fd00::7"), &http).as_deref(), Some("http://[fd00::7]:8080/busy"));
    }

    #[test]
    fn test_probe_url_requires_running_with_address() {
        let http = HttpProbeSpec::default();
        assert_eq!(probe_url(&Pod::default(), &http), None);

        let mut pending = running("10.0.0.7");
        pending.status.as_mut().unwrap().phase = Some("Pending".to_string());
        assert_eq!(probe_url(&pending, &http), None);

        let mut no_ip = running("10.0.0.7");
        no_ip.status.as_mut().unwrap().pod_ip = None;
        assert_eq!(probe_url(&no_ip, &http), None);
    }

    #[tokio::test]
    async fn test_http_success_is_busy() {
        let http = HttpProbeSpec::default();
        let pod = running("10.0.0.7");
        assert!(is_busy_by_http(&pod, &http, &FixedProber(Ok(200))).await);
        assert!(!is_busy_by_http(&pod, &http, &FixedProber(Ok(503))).await);
        assert!(!is_busy_by_http(&pod, &http, &FixedProber(Err(()))).await);
    }

    #[tokio::test]
    async fn test_http_success_is_idle_inverts() {
        let http = HttpProbeSpec {
            success_is_busy: false,
            ..Default::default()
        };
        let pod = running("10.0.0.7");
        assert!(!is_busy_by_http(&pod, &http, &FixedProber(Ok(200))).await);
        assert!(is_busy_by_http(&pod, &http, &FixedProber(Ok(503))).await);
        // transport failures stay idle regardless of mapping
        assert!(!is_busy_by_http(&pod, &http, &FixedProber(Err(()))).await);
    }

    #[tokio::test]
    async fn test_http_skips_pods_not_running() {
        let http = HttpProbeSpec::default();
        assert!(!is_busy_by_http(&Pod::default(), &http, &FixedProber(Ok(200))).await);
    }

    #[tokio::test]
    async fn test_dispatch_by_mode() {
        let probe = BusyProbeSpec::default();
        let prober = FixedProber(Ok(200));
        assert!(is_busy(&annotated(Some("true")), &probe, &prober).await);

        let probe = BusyProbeSpec {
            mode: ProbeMode::Http,
            ..Default::default()
        };
        assert!(!is_busy(&annotated(Some("true")), &probe, &prober).await);
    }
}
