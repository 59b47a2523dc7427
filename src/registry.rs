use crate::config::{Config, Registry};
use crate::error::ResolveError;
use crate::image_reference::{ImageReference, is_digest};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::ACCEPT;
use reqwest::{Certificate, Client, RequestBuilder, Response, StatusCode};
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Credentials available for registry lookups, keyed by registry hostname.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    registries: Vec<Registry>,
}

impl RegistryAuth {
    pub fn new(registries: Vec<Registry>) -> Self {
        Self { registries }
    }

    pub fn find(&self, hostname: &str) -> Option<&Registry> {
        self.registries.iter().find(|r| r.hostname == hostname)
    }
}

/// Looks up the content digest an image reference currently points to.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn get_image_version(
        &self,
        image: &str,
        auth: &RegistryAuth,
    ) -> Result<String, ResolveError>;
}

pub fn create_client(config: &Config) -> Result<Client> {
    info!("Initializing OCI Registry HTTP client");
    // System certificates are loaded automatically with rustls-tls-native-roots
    let mut client_builder = Client::builder();

    for file_path in &config.tls.ca_certificate_paths {
        let file_content = fs::read(file_path)
            .with_context(|| format!("Failed to read file {}", file_path.display()))?;
        let cert = Certificate::from_pem(&file_content).context("Failed to parse certificate")?;
        client_builder = client_builder.add_root_certificate(cert);
    }

    client_builder.build().context("Failed to build HTTP client")
}

/// Resolves digests through the registry's `/v2/<name>/manifests/<tag>` endpoint.
pub struct OciRegistryResolver {
    client: Client,
    timeout: Duration,
    enable_jfrog_artifactory_fallback: bool,
}

impl OciRegistryResolver {
    pub fn new(client: Client, timeout: Duration, enable_jfrog_artifactory_fallback: bool) -> Self {
        Self {
            client,
            timeout,
            enable_jfrog_artifactory_fallback,
        }
    }

    async fn fetch_digest(
        &self,
        reference: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<String, ResolveError> {
        let host = api_host(reference.registry());
        let url = format!(
            "https://{}/v2/{}/manifests/{}",
            host,
            reference.path(),
            reference.tag_or_default()
        );

        let response = self.fetch_manifest(reference, auth, &url).await;
        let response = match response {
            Ok(response) => response,
            Err(err) if self.enable_jfrog_artifactory_fallback => {
                info!(
                    "Falling back to JFrog Artifactory specific Repository Path Method after: {}",
                    err
                );
                let path = reference.path();
                let repository_name = path.split('/').next().unwrap_or_default();
                // https://jfrog.com/help/r/jfrog-artifactory-documentation/the-repository-path-method-for-docker
                let fallback_url = format!(
                    "https://{}/artifactory/api/docker/{}/v2/{}/manifests/{}",
                    host,
                    repository_name,
                    path,
                    reference.tag_or_default()
                );
                self.fetch_manifest(reference, auth, &fallback_url).await?
            }
            Err(err) => return Err(err),
        };

        get_digest_from_response(reference, &response)
    }

    async fn fetch_manifest(
        &self,
        reference: &ImageReference,
        auth: &RegistryAuth,
        url: &str,
    ) -> Result<Response, ResolveError> {
        debug!("Fetching manifest for {} from URL {}", reference, url);
        let request = self.client.get(url).header(ACCEPT, MANIFEST_MEDIA_TYPES);
        let request = authorize(request, auth.find(reference.registry()));

        let response = request
            .send()
            .await
            .map_err(|e| ResolveError::Unreachable {
                registry: reference.registry().to_string(),
                message: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ResolveError::Unauthorized {
                registry: reference.registry().to_string(),
                reference: reference.to_string(),
                status: response.status().as_u16(),
            }),
            StatusCode::NOT_FOUND => Err(ResolveError::NotFound {
                reference: reference.to_string(),
            }),
            status => Err(ResolveError::UnexpectedStatus {
                registry: reference.registry().to_string(),
                reference: reference.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl ImageResolver for OciRegistryResolver {
    async fn get_image_version(
        &self,
        image: &str,
        auth: &RegistryAuth,
    ) -> Result<String, ResolveError> {
        let reference =
            ImageReference::parse(image).map_err(|source| ResolveError::InvalidReference {
                reference: image.to_string(),
                source,
            })?;

        let digest = tokio::time::timeout(self.timeout, self.fetch_digest(&reference, auth))
            .await
            .map_err(|_| ResolveError::Timeout(self.timeout))??;

        info!("Found image digest {} for {}", digest, reference);
        Ok(digest)
    }
}

fn authorize(request: RequestBuilder, credentials: Option<&Registry>) -> RequestBuilder {
    match credentials {
        Some(Registry {
            username: Some(username),
            token,
            ..
        }) => request.basic_auth(username, Some(token.expose_secret())),
        Some(registry) if !registry.token.is_empty() => {
            request.bearer_auth(registry.token.expose_secret())
        }
        _ => request,
    }
}

/// Docker Hub serves its registry API from a different host than the one used in
/// image names.
fn api_host(registry: &str) -> &str {
    match registry {
        "docker.io" | "index.docker.io" => "registry-1.docker.io",
        other => other,
    }
}

fn get_digest_from_response(
    reference: &ImageReference,
    response: &Response,
) -> Result<String, ResolveError> {
    let digest = response
        .headers()
        .get(DIGEST_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !is_digest(digest) {
        return Err(ResolveError::MalformedDigest {
            reference: reference.to_string(),
            digest: digest.to_string(),
        });
    }
    Ok(digest.to_owned())
}
