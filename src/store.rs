use crate::child::{FIELD_MANAGER, template_hash};
use crate::crd::ManagedWorkload;
use crate::error::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
#[cfg(test)]
use mockall::automock;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Backing store of `ManagedWorkload` resources and their child deployments.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Fresh read, `None` when the resource no longer exists.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManagedWorkload>, Error>;

    /// Writes the status sub-resource. Fails with [`Error::Conflict`] when the
    /// resource changed since it was read.
    async fn update_status(&self, workload: &ManagedWorkload) -> Result<(), Error>;

    /// Creates or replaces the deployment, skipping the write when the stored
    /// template hash already matches.
    async fn apply_deployment(&self, deployment: Deployment) -> Result<ApplyOutcome, Error>;
}

/// Body of a status replacement. The whole status is written so that entries
/// dropped from `status.versions` disappear on the server, and the read
/// `resourceVersion` makes the write conditional.
fn status_update_body(workload: &ManagedWorkload) -> Result<Vec<u8>, Error> {
    if workload.resource_version().is_none() {
        return Err(Error::MissingField("metadata.resourceVersion"));
    }
    Ok(serde_json::to_vec(workload)?)
}

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManagedWorkload>, Error> {
        let api: Api<ManagedWorkload> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_status(&self, workload: &ManagedWorkload) -> Result<(), Error> {
        let name = workload.name_any();
        let namespace = workload
            .namespace()
            .ok_or(Error::MissingField("metadata.namespace"))?;
        let api: Api<ManagedWorkload> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        let body = status_update_body(workload)?;
        debug!("Replacing status of ManagedWorkload {}/{}", namespace, name);
        match api.replace_status(&name, &pp, body).await {
            Ok(_) => {
                info!("ManagedWorkload {}/{} status updated", namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::Conflict { name }),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_deployment(&self, mut deployment: Deployment) -> Result<ApplyOutcome, Error> {
        let name = deployment.name_any();
        let namespace = deployment
            .namespace()
            .ok_or(Error::MissingField("metadata.namespace"))?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let apply_error = |source| Error::Apply {
            name: name.clone(),
            source,
        };

        let Some(existing) = api.get_opt(&name).await.map_err(apply_error)? else {
            info!("Creating deployment {}/{}", namespace, name);
            api.create(&pp, &deployment).await.map_err(apply_error)?;
            return Ok(ApplyOutcome::Created);
        };

        if template_hash(&existing).is_some() && template_hash(&existing) == template_hash(&deployment)
        {
            debug!("Deployment {}/{} is up to date", namespace, name);
            return Ok(ApplyOutcome::Unchanged);
        }

        info!("Updating deployment {}/{}", namespace, name);
        deployment.metadata.resource_version = existing.resource_version();
        api.replace(&name, &pp, &deployment)
            .await
            .map_err(apply_error)?;
        Ok(ApplyOutcome::Updated)
    }
}
