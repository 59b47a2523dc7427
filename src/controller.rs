use crate::child::desired_deployment;
use crate::crd::{ManagedWorkload, ManagedWorkloadSpec, ManagedWorkloadStatus, Phase};
use crate::error::{Error, report};
use crate::hash::is_different;
use crate::state::ControllerContext;
use crate::version::{ComponentUpdater, VersionReconciler};
use crate::webserver::Readiness;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::Store;
use kube::runtime::{WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}, default namespace {}",
        api_server_info.major,
        api_server_info.minor,
        client.default_namespace()
    );
    Ok(client)
}

/// Watches `ManagedWorkload` resources and their deployments until `shutdown`
/// is cancelled.
///
/// Only spec changes (a new `metadata.generation`) of a `ManagedWorkload` start a
/// pass, so the operator's own status writes do not trigger it again. Readiness
/// flips once the initial list of resources has been synced.
pub async fn run(
    client: Client,
    ctx: Arc<ControllerContext>,
    readiness: Readiness,
    shutdown: CancellationToken,
) {
    let workloads: Api<ManagedWorkload> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client);

    let (reader, writer) = reflector::store();
    let workload_changes = watcher(workloads, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    info!("Starting ManagedWorkload controller");
    let synced = reader.clone();
    let controller = Controller::for_stream(workload_changes, reader)
        .owns(deployments, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!("Reconciled {} with {:?}", object, action),
                Err(e) => warn!("Reconcile stream error: {}", report(&e)),
            }
        });

    let mark_ready = async {
        mark_ready_when_synced(synced, readiness.clone()).await;
        futures::future::pending::<()>().await
    };

    tokio::select! {
        _ = controller => info!("Controller stream ended"),
        _ = mark_ready => {}
        _ = shutdown.cancelled() => info!("Stopping ManagedWorkload controller"),
    }
    readiness.set_ready(false);
}

async fn mark_ready_when_synced(store: Store<ManagedWorkload>, readiness: Readiness) {
    match store.wait_until_ready().await {
        Ok(()) => {
            info!("Initial list of ManagedWorkloads synced");
            readiness.set_ready(true);
        }
        Err(e) => warn!("ManagedWorkload store never became ready: {}", e),
    }
}

async fn reconcile(
    workload: Arc<ManagedWorkload>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, Error> {
    let namespace = workload
        .namespace()
        .ok_or(Error::MissingField("metadata.namespace"))?;
    reconcile_workload(&ctx, &namespace, &workload.name_any()).await
}

fn error_policy(
    workload: Arc<ManagedWorkload>,
    err: &Error,
    ctx: Arc<ControllerContext>,
) -> Action {
    let namespace = workload.namespace().unwrap_or_default();
    match err {
        Error::Conflict { .. } => info!(
            "Status of ManagedWorkload {}/{} changed concurrently, retrying",
            namespace,
            workload.name_any()
        ),
        _ => error!(
            "Reconciliation of ManagedWorkload {}/{} failed: {}",
            namespace,
            workload.name_any(),
            report(err)
        ),
    }
    Action::requeue(ctx.settings.error_interval())
}

/// One reconcile pass: re-read, probe component versions, apply the child
/// deployment, persist the status if it changed and pick the requeue interval.
///
/// Failures of single components or of the deployment do not abort the pass;
/// the first of them is returned after the status has been written.
pub async fn reconcile_workload(
    ctx: &ControllerContext,
    namespace: &str,
    name: &str,
) -> Result<Action, Error> {
    info!("Reconciling ManagedWorkload {}/{}", namespace, name);

    let Some(mut workload) = ctx.store.get(namespace, name).await? else {
        info!(
            "ManagedWorkload {}/{} no longer exists, nothing to reconcile",
            namespace, name
        );
        return Ok(Action::await_change());
    };

    let old_status = workload.status.clone().unwrap_or_default();
    let mut status = old_status.clone();
    let mut failures = probe_versions(ctx, &workload.spec, &mut status).await;
    workload.status = Some(status);

    let phase = match apply_child(ctx, &workload).await {
        Ok(phase) => phase,
        Err(err) => {
            error!(
                "Could not create or update deployment for ManagedWorkload {}/{}: {}",
                namespace,
                name,
                report(&err)
            );
            failures.push(err);
            Phase::Error
        }
    };

    let status = workload.status.get_or_insert_with(Default::default);
    status.phase = Some(phase);

    if is_different(&old_status, status)? {
        status.updated_timestamp = Some(ctx.clock.now());
        info!(
            "Status of ManagedWorkload {}/{} changed, updating",
            namespace, name
        );
        ctx.store.update_status(&workload).await?;
    } else {
        debug!("Status of ManagedWorkload {}/{} unchanged", namespace, name);
    }

    match failures.into_iter().next() {
        Some(err) => Err(err),
        None => {
            info!("Reconciling ManagedWorkload {}/{} done", namespace, name);
            Ok(Action::requeue(ctx.settings.default_interval()))
        }
    }
}

async fn probe_versions(
    ctx: &ControllerContext,
    spec: &ManagedWorkloadSpec,
    status: &mut ManagedWorkloadStatus,
) -> Vec<Error> {
    let reconciler = VersionReconciler::new(ctx.resolver.as_ref(), ctx.clock.as_ref())
        .with_probe_interval(ctx.settings.default_interval());
    let mut failures = Vec::new();

    status.versions.retain(|component, _| {
        let declared = spec.components.contains_key(component);
        if !declared {
            info!("Removing version status of undeclared component {}", component);
        }
        declared
    });

    for (component, component_spec) in &spec.components {
        if !component_spec.enabled {
            debug!("Component {} is disabled", component);
            continue;
        }

        let target = status.versions.entry(component.clone()).or_default();
        let mut updater = ComponentUpdater::new(
            component,
            component_spec,
            target,
            &ctx.tenant_registry,
            ctx.latest_images.as_ref(),
        );
        if let Err(source) = reconciler.run(&mut updater, &ctx.auth).await {
            warn!(
                "Failed to resolve image version of component {}: {}",
                component,
                report(&source)
            );
            failures.push(Error::Resolution {
                component: component.clone(),
                source,
            });
        }
    }

    failures
}

async fn apply_child(ctx: &ControllerContext, workload: &ManagedWorkload) -> Result<Phase, Error> {
    let Some(deployment) = desired_deployment(workload)? else {
        info!(
            "No component of ManagedWorkload {} has a resolved image yet",
            workload.name_any()
        );
        return Ok(Phase::Deploying);
    };

    let outcome = ctx.store.apply_deployment(deployment).await?;
    debug!(
        "Deployment of ManagedWorkload {}: {:?}",
        workload.name_any(),
        outcome
    );
    Ok(Phase::Running)
}
