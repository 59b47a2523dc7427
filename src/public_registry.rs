use crate::error::ResolveError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Latest published image of a component on the public registry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LatestImageInfo {
    pub source: String,
    pub tag: String,
}

impl fmt::Display for LatestImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.tag)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LatestImageSource: Send + Sync {
    async fn latest_image_info(&self, component: &str) -> Result<LatestImageInfo, ResolveError>;
}

/// Queries `<endpoint>/components/<component>/latest`, which answers with
/// `{"source": "<repository>", "tag": "<tag>"}`.
pub struct PublicRegistryClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl PublicRegistryClient {
    pub fn new(client: Client, endpoint: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn fetch(&self, component: &str) -> Result<LatestImageInfo, reqwest::Error> {
        let url = format!("{}/components/{}/latest", self.endpoint, component);
        debug!("Fetching latest image info from {}", url);
        self.client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<LatestImageInfo>()
            .await
    }
}

#[async_trait]
impl LatestImageSource for PublicRegistryClient {
    async fn latest_image_info(&self, component: &str) -> Result<LatestImageInfo, ResolveError> {
        self.fetch(component)
            .await
            .map_err(|e| ResolveError::LatestImageInfo {
                component: component.to_string(),
                message: e.to_string(),
            })
    }
}

/// Used when no public registry endpoint is configured; components that opt into
/// the public registry fail to resolve until it is.
pub struct DisabledPublicRegistry;

#[async_trait]
impl LatestImageSource for DisabledPublicRegistry {
    async fn latest_image_info(&self, _component: &str) -> Result<LatestImageInfo, ResolveError> {
        Err(ResolveError::PublicRegistryNotConfigured)
    }
}
