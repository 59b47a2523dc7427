use crate::clock::Clock;
use crate::config::{ReconcileSettings, TenantRegistry};
use crate::public_registry::LatestImageSource;
use crate::registry::{ImageResolver, RegistryAuth};
use crate::store::WorkloadStore;
use std::sync::Arc;

/// Collaborators shared by all reconcile passes.
#[derive(Clone)]
pub struct ControllerContext {
    pub(crate) store: Arc<dyn WorkloadStore>,
    pub(crate) resolver: Arc<dyn ImageResolver>,
    pub(crate) latest_images: Arc<dyn LatestImageSource>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) auth: RegistryAuth,
    pub(crate) tenant_registry: TenantRegistry,
    pub(crate) settings: ReconcileSettings,
}
