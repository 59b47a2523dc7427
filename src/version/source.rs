use super::Updater;
use crate::crd::VersionSource;

/// Pinned image beats pinned version beats public registry beats the tenant
/// registry default, no matter which other flags are set.
pub fn determine_source<U: Updater + ?Sized>(updater: &U) -> VersionSource {
    if updater.custom_image().is_some() {
        VersionSource::CustomImage
    } else if updater.custom_version().is_some() {
        VersionSource::CustomVersion
    } else if updater.is_public_registry_enabled() {
        VersionSource::PublicRegistry
    } else {
        VersionSource::TenantRegistry
    }
}
