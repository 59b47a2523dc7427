use crate::crd::ManagedWorkload;
use crate::error::Error;
use crate::hash::{ANNOTATION_HASH, generate_hash};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, LocalObjectReference, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

pub static FIELD_MANAGER: &str = "image-version-operator";
static LABEL_NAME: &str = "app.kubernetes.io/name";
static LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Deployment running every enabled component whose image has been resolved,
/// each pinned by digest. `None` while no component has a resolved image.
pub fn desired_deployment(workload: &ManagedWorkload) -> Result<Option<Deployment>, Error> {
    let name = workload
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingField("metadata.name"))?;
    let owner = workload
        .controller_owner_ref(&())
        .ok_or(Error::MissingField("metadata.uid"))?;

    let versions = workload.status.as_ref().map(|s| &s.versions);
    let containers: Vec<Container> = workload
        .spec
        .components
        .iter()
        .filter(|(_, component)| component.enabled)
        .filter_map(|(component, _)| {
            let image = versions?.get(component)?.image_reference()?;
            Some(Container {
                name: component.clone(),
                image: Some(image),
                image_pull_policy: Some("IfNotPresent".to_string()),
                ..Default::default()
            })
        })
        .collect();

    if containers.is_empty() {
        return Ok(None);
    }

    let labels = BTreeMap::from([
        (LABEL_NAME.to_string(), name.clone()),
        (LABEL_MANAGED_BY.to_string(), FIELD_MANAGER.to_string()),
    ]);
    let image_pull_secrets = workload
        .spec
        .image_pull_secrets
        .iter()
        .map(|secret| LocalObjectReference {
            name: secret.clone(),
        })
        .collect::<Vec<_>>();

    let mut deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: workload.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(workload.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    image_pull_secrets: (!image_pull_secrets.is_empty())
                        .then_some(image_pull_secrets),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    let hash = generate_hash(&deployment)?;
    deployment.metadata.annotations = Some(BTreeMap::from([(ANNOTATION_HASH.to_string(), hash)]));
    Ok(Some(deployment))
}

pub fn template_hash(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_HASH))
        .map(String::as_str)
}
