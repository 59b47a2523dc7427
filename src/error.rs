use crate::image_reference::ParseError;
use std::time::Duration;
use thiserror::Error;

/// Failures while determining the image version of a component. All of them are
/// retryable and leave the component's version status untouched.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid image reference {reference}")]
    InvalidReference {
        reference: String,
        #[source]
        source: ParseError,
    },
    #[error("registry {registry} is unreachable: {message}")]
    Unreachable { registry: String, message: String },
    #[error("registry {registry} rejected the credentials for {reference} (status {status})")]
    Unauthorized {
        registry: String,
        reference: String,
        status: u16,
    },
    #[error("image {reference} was not found in its registry")]
    NotFound { reference: String },
    #[error("registry {registry} returned status {status} for {reference}")]
    UnexpectedStatus {
        registry: String,
        reference: String,
        status: u16,
    },
    #[error("registry returned a malformed digest {digest:?} for {reference}")]
    MalformedDigest { reference: String, digest: String },
    #[error("timed out after {0:?} waiting for the registry")]
    Timeout(Duration),
    #[error("public registry is not configured")]
    PublicRegistryNotConfigured,
    #[error("failed to fetch latest image info for component {component}: {message}")]
    LatestImageInfo { component: String, message: String },
}

/// Errors of a reconcile pass. The controller turns every one of them into a
/// short requeue.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to resolve version of component {component}")]
    Resolution {
        component: String,
        #[source]
        source: ResolveError,
    },
    #[error("failed to apply deployment {name}")]
    Apply {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("conflict while updating status of ManagedWorkload {name}")]
    Conflict { name: String },
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("failed to serialize object for hashing: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Renders `err` followed by its chain of sources, separated by `: `.
pub fn report(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
