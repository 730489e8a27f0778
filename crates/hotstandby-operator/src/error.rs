//! # Errors
//!
//! Failures that abort a reconcile pass. Probe failures never show up here;
//! they resolve to "not busy" inside the probe module.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Any Kubernetes API failure other than a child-deployment 404
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    /// `podTemplate` could not be decoded as a pod template
    #[error("invalid podTemplate: {0}")]
    InvalidPodTemplate(#[source] serde_json::Error),

    /// The resource is missing metadata the reconcile depends on
    #[error("resource is missing metadata.{0}")]
    MissingObjectKey(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-friendly label, attached to failure logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube(_) => "kube",
            Error::InvalidPodTemplate(_) => "invalid_pod_template",
            Error::MissingObjectKey(_) => "missing_object_key",
            Error::Io(_) => "io",
        }
    }
}
