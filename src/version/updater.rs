use crate::config::TenantRegistry;
use crate::crd::{ComponentSpec, VersionStatus};
use crate::error::ResolveError;
use crate::image_reference::ImageReference;
use crate::public_registry::{LatestImageInfo, LatestImageSource};
use crate::registry::RegistryAuth;
use async_trait::async_trait;
use tracing::debug;

/// Capabilities of one component for a single reconcile pass, bound to the
/// `VersionStatus` the pass mutates.
#[async_trait]
pub trait Updater: Send + Sync {
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
    fn target(&mut self) -> &mut VersionStatus;
    /// Pinned image reference, `None` when unset or empty.
    fn custom_image(&self) -> Option<&str>;
    /// Pinned tag within [`Updater::default_repository`], `None` when unset or empty.
    fn custom_version(&self) -> Option<&str>;
    fn is_auto_update_enabled(&self) -> bool;
    fn is_public_registry_enabled(&self) -> bool;
    fn default_repository(&self) -> String;
    fn default_image(&self) -> String;
    async fn latest_image_info(&self) -> Result<LatestImageInfo, ResolveError>;
    /// Picks the registry specific default image used by [`Updater::default_image`]
    /// for the tenant registry lookup. Safe to call repeatedly.
    async fn use_defaults(&mut self, auth: &RegistryAuth) -> Result<(), ResolveError>;
}

pub struct ComponentUpdater<'a> {
    name: &'a str,
    spec: &'a ComponentSpec,
    target: &'a mut VersionStatus,
    tenant: &'a TenantRegistry,
    latest_images: &'a dyn LatestImageSource,
    default_image: Option<String>,
}

impl<'a> ComponentUpdater<'a> {
    pub fn new(
        name: &'a str,
        spec: &'a ComponentSpec,
        target: &'a mut VersionStatus,
        tenant: &'a TenantRegistry,
        latest_images: &'a dyn LatestImageSource,
    ) -> Self {
        Self {
            name,
            spec,
            target,
            tenant,
            latest_images,
            default_image: None,
        }
    }

    fn tenant_image(&self) -> String {
        format!("{}:{}", self.default_repository(), self.tenant.default_tag)
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

#[async_trait]
impl<'a> Updater for ComponentUpdater<'a> {
    fn name(&self) -> &str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        self.spec.enabled
    }

    fn target(&mut self) -> &mut VersionStatus {
        self.target
    }

    fn custom_image(&self) -> Option<&str> {
        non_empty(self.spec.image.as_ref())
    }

    fn custom_version(&self) -> Option<&str> {
        non_empty(self.spec.version.as_ref())
    }

    fn is_auto_update_enabled(&self) -> bool {
        self.spec.auto_update
    }

    fn is_public_registry_enabled(&self) -> bool {
        self.spec.public_registry
    }

    fn default_repository(&self) -> String {
        match non_empty(self.spec.repository.as_ref()) {
            Some(repository) => repository.to_string(),
            None => self.tenant.repository_for(self.name),
        }
    }

    /// Tenant default tag until [`Updater::use_defaults`] picked the tag of the
    /// component's registry.
    fn default_image(&self) -> String {
        self.default_image
            .clone()
            .unwrap_or_else(|| self.tenant_image())
    }

    async fn latest_image_info(&self) -> Result<LatestImageInfo, ResolveError> {
        self.latest_images.latest_image_info(self.name).await
    }

    async fn use_defaults(&mut self, auth: &RegistryAuth) -> Result<(), ResolveError> {
        let repository = self.default_repository();
        let registry = parse_image(&repository)?.registry().to_string();
        let credentials = auth.find(&registry);
        if credentials.is_none() {
            debug!(
                "No credentials configured for registry {}, component {} is looked up anonymously",
                registry, self.name
            );
        }

        let tag = match credentials.and_then(|r| non_empty(r.default_tag.as_ref())) {
            Some(tag) => tag.to_string(),
            None => self.tenant.default_tag.clone(),
        };
        let image = format!("{}:{}", repository, tag);
        parse_image(&image)?;
        debug!("Default image of component {} is {}", self.name, image);
        self.default_image = Some(image);
        Ok(())
    }
}

fn parse_image(image: &str) -> Result<ImageReference, ResolveError> {
    ImageReference::parse(image).map_err(|source| ResolveError::InvalidReference {
        reference: image.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;
    use crate::public_registry::MockLatestImageSource;
    use crate::secret_string::SecretString;

    fn tenant() -> TenantRegistry {
        TenantRegistry {
            registry: "registry.example.com".to_string(),
            repository_prefix: Some("tenant".to_string()),
            default_tag: "stable".to_string(),
        }
    }

    #[test]
    fn test_flags_follow_component_spec() {
        let tenant = tenant();
        let latest = MockLatestImageSource::new();
        let spec = ComponentSpec {
            enabled: false,
            image: Some(" my.registry.com/agent:1 ".to_string()),
            version: Some("  ".to_string()),
            auto_update: false,
            public_registry: true,
            ..Default::default()
        };
        let mut status = VersionStatus::default();
        let updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);

        assert_eq!(updater.name(), "agent");
        assert!(!updater.is_enabled());
        assert_eq!(updater.custom_image(), Some("my.registry.com/agent:1"));
        assert_eq!(updater.custom_version(), None);
        assert!(!updater.is_auto_update_enabled());
        assert!(updater.is_public_registry_enabled());
    }

    #[test]
    fn test_default_repository_and_image() {
        let tenant = tenant();
        let latest = MockLatestImageSource::new();
        let mut spec = ComponentSpec::default();
        let mut status = VersionStatus::default();
        let updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);
        assert_eq!(
            updater.default_repository(),
            "registry.example.com/tenant/agent"
        );
        assert_eq!(
            updater.default_image(),
            "registry.example.com/tenant/agent:stable"
        );

        spec.repository = Some("mirror.example.com/agent".to_string());
        let updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);
        assert_eq!(updater.default_repository(), "mirror.example.com/agent");
    }

    #[tokio::test]
    async fn test_use_defaults_is_idempotent() {
        let tenant = tenant();
        let latest = MockLatestImageSource::new();
        let spec = ComponentSpec::default();
        let mut status = VersionStatus::default();
        let mut updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);
        let auth = RegistryAuth::default();

        updater.use_defaults(&auth).await.unwrap();
        let first = updater.default_image();
        updater.use_defaults(&auth).await.unwrap();
        assert_eq!(updater.default_image(), first);
    }

    #[tokio::test]
    async fn test_use_defaults_takes_tag_of_matching_registry() {
        let tenant = tenant();
        let latest = MockLatestImageSource::new();
        let spec = ComponentSpec::default();
        let mut status = VersionStatus::default();
        let mut updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);
        let auth = RegistryAuth::new(vec![
            Registry {
                hostname: "quay.io".to_string(),
                username: None,
                token: SecretString::new("other"),
                default_tag: Some("nightly".to_string()),
            },
            Registry {
                hostname: "registry.example.com".to_string(),
                username: Some("robot".to_string()),
                token: SecretString::new("token"),
                default_tag: Some("2.0".to_string()),
            },
        ]);

        assert_eq!(
            updater.default_image(),
            "registry.example.com/tenant/agent:stable"
        );
        updater.use_defaults(&auth).await.unwrap();
        assert_eq!(
            updater.default_image(),
            "registry.example.com/tenant/agent:2.0"
        );
    }

    #[tokio::test]
    async fn test_use_defaults_keeps_tenant_tag_without_registry_tag() {
        let tenant = tenant();
        let latest = MockLatestImageSource::new();
        let spec = ComponentSpec::default();
        let mut status = VersionStatus::default();
        let mut updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);
        let auth = RegistryAuth::new(vec![Registry {
            hostname: "registry.example.com".to_string(),
            username: None,
            token: SecretString::new("token"),
            default_tag: Some("  ".to_string()),
        }]);

        updater.use_defaults(&auth).await.unwrap();
        assert_eq!(
            updater.default_image(),
            "registry.example.com/tenant/agent:stable"
        );
    }

    #[tokio::test]
    async fn test_use_defaults_rejects_invalid_tag() {
        let tenant = tenant();
        let latest = MockLatestImageSource::new();
        let spec = ComponentSpec::default();
        let mut status = VersionStatus::default();
        let mut updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);
        let auth = RegistryAuth::new(vec![Registry {
            hostname: "registry.example.com".to_string(),
            username: None,
            token: SecretString::new("token"),
            default_tag: Some("not a tag".to_string()),
        }]);

        let err = updater.use_defaults(&auth).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidReference { .. }));
        assert_eq!(
            updater.default_image(),
            "registry.example.com/tenant/agent:stable"
        );
    }

    #[tokio::test]
    async fn test_use_defaults_rejects_invalid_repository() {
        let tenant = tenant();
        let latest = MockLatestImageSource::new();
        let spec = ComponentSpec {
            repository: Some("registry.example.com//agent".to_string()),
            ..Default::default()
        };
        let mut status = VersionStatus::default();
        let mut updater = ComponentUpdater::new("agent", &spec, &mut status, &tenant, &latest);

        let err = updater
            .use_defaults(&RegistryAuth::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_latest_image_info_is_asked_for_the_component() {
        let tenant = tenant();
        let mut latest = MockLatestImageSource::new();
        latest
            .expect_latest_image_info()
            .withf(|component| component == "connector")
            .times(1)
            .returning(|_| {
                Ok(LatestImageInfo {
                    source: "some.registry.com".to_string(),
                    tag: "1.2.3".to_string(),
                })
            });
        let spec = ComponentSpec::default();
        let mut status = VersionStatus::default();
        let updater = ComponentUpdater::new("connector", &spec, &mut status, &tenant, &latest);

        let info = updater.latest_image_info().await.unwrap();
        assert_eq!(info.tag, "1.2.3");
    }
}
