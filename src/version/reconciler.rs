use super::{Updater, determine_source};
use crate::clock::Clock;
use crate::crd::{VersionSource, VersionStatus};
use crate::error::ResolveError;
use crate::image_reference::{ImageReference, is_digest};
use crate::registry::{ImageResolver, RegistryAuth};
use chrono::TimeDelta;
use std::time::Duration;
use tracing::{debug, info};

pub struct VersionReconciler<'a> {
    resolver: &'a dyn ImageResolver,
    clock: &'a dyn Clock,
    probe_interval: Option<Duration>,
}

impl<'a> VersionReconciler<'a> {
    pub fn new(resolver: &'a dyn ImageResolver, clock: &'a dyn Clock) -> Self {
        Self {
            resolver,
            clock,
            probe_interval: None,
        }
    }

    /// Auto-updating components whose last probe is younger than `interval` and
    /// that still ask for the image they were resolved from are not probed again.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = Some(interval);
        self
    }

    /// Resolves the image of one component and rewrites its version status.
    ///
    /// Components with auto-update disabled are only resolved while their status
    /// is empty or was produced by a different source. On error the status is
    /// left exactly as it was.
    pub async fn run<U: Updater + ?Sized>(
        &self,
        updater: &mut U,
        auth: &RegistryAuth,
    ) -> Result<(), ResolveError> {
        let name = updater.name().to_string();
        if !updater.is_enabled() {
            debug!("Component {} is disabled, skipping version check", name);
            return Ok(());
        }

        let wanted = determine_source(updater);
        let auto_update = updater.is_auto_update_enabled();
        let current = updater.target();
        if !auto_update && !current.is_empty() && current.source == Some(wanted) {
            info!(
                "Skipping version check of component {}, auto-update is disabled and source {} is unchanged",
                name, wanted
            );
            return Ok(());
        }

        // None for the public registry, whose image is only known after asking it.
        let requested = match wanted {
            VersionSource::CustomImage => Some(updater.custom_image().unwrap_or_default().to_string()),
            VersionSource::CustomVersion => Some(format!(
                "{}:{}",
                updater.default_repository(),
                updater.custom_version().unwrap_or_default()
            )),
            VersionSource::PublicRegistry => None,
            VersionSource::TenantRegistry => {
                updater.use_defaults(auth).await?;
                Some(updater.default_image())
            }
        };

        if self.is_fresh(updater.target(), wanted, requested.as_deref()) {
            debug!(
                "Skipping version check of component {}, last probe is younger than {:?}",
                name, self.probe_interval
            );
            return Ok(());
        }

        let image = match requested {
            Some(image) => image,
            None => updater.latest_image_info().await?.to_string(),
        };

        // All writes go to a copy that replaces the status only once every step
        // succeeded.
        let mut next = updater.target().clone();
        update_version_status(&mut next, &image, self.resolver, auth).await?;
        next.version = match wanted {
            VersionSource::CustomVersion => updater.custom_version().unwrap_or_default().to_string(),
            _ => next.image_tag.clone(),
        };
        next.source = Some(wanted);
        next.last_probe_timestamp = Some(self.clock.now());
        info!(
            "Component {} resolved to {}@{} (source {})",
            name, next.image_repository, next.image_hash, wanted
        );
        *updater.target() = next;
        Ok(())
    }

    fn is_fresh(&self, current: &VersionStatus, wanted: VersionSource, requested: Option<&str>) -> bool {
        let (Some(interval), Some(probed)) = (self.probe_interval, current.last_probe_timestamp) else {
            return false;
        };
        if current.is_empty() || current.source != Some(wanted) {
            return false;
        }
        let Ok(interval) = TimeDelta::from_std(interval) else {
            return false;
        };
        if self.clock.now().signed_duration_since(probed) >= interval {
            return false;
        }
        requested.is_none_or(|image| was_resolved_from(current, image))
    }
}

/// Whether `status` holds the result of resolving `image`.
fn was_resolved_from(status: &VersionStatus, image: &str) -> bool {
    let Ok(reference) = ImageReference::parse(image) else {
        return false;
    };
    if reference.repository != status.image_repository {
        return false;
    }
    match &reference.digest {
        Some(digest) => *digest == status.image_hash,
        None => reference.tag_or_default() == status.image_tag,
    }
}

/// Writes repository, tag and digest of `image` into `status`.
///
/// Digest pinned references are taken verbatim without asking the registry.
/// Never touches `source` or `last_probe_timestamp`, and mutates nothing on error.
pub async fn update_version_status(
    status: &mut VersionStatus,
    image: &str,
    resolver: &dyn ImageResolver,
    auth: &RegistryAuth,
) -> Result<(), ResolveError> {
    let reference = ImageReference::parse(image).map_err(|source| {
        ResolveError::InvalidReference {
            reference: image.to_string(),
            source,
        }
    })?;

    if let Some(digest) = &reference.digest {
        debug!("Image {} is pinned by digest, skipping registry lookup", image);
        status.image_hash = digest.clone();
        status.image_tag = digest.clone();
        status.image_repository = reference.repository;
        return Ok(());
    }

    let digest = resolver.get_image_version(image, auth).await?;
    if !is_digest(&digest) {
        return Err(ResolveError::MalformedDigest {
            reference: image.to_string(),
            digest,
        });
    }

    status.image_tag = reference.tag_or_default().to_string();
    status.image_hash = digest;
    status.image_repository = reference.repository;
    Ok(())
}
