use crate::clock::SystemClock;
use crate::crd::ManagedWorkload;
use crate::public_registry::{DisabledPublicRegistry, LatestImageSource, PublicRegistryClient};
use crate::registry::{OciRegistryResolver, RegistryAuth};
use crate::state::ControllerContext;
use crate::store::KubeStore;
use crate::webserver::Readiness;
use anyhow::Context;
use kube::CustomResourceExt;
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod child;
mod clock;
mod config;
mod controller;
mod crd;
mod error;
mod hash;
mod image_reference;
mod public_registry;
mod registry;
mod secret_string;
mod state;
mod store;
mod version;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if env::args().nth(1).as_deref() == Some("crd") {
        print!("{}", serde_yaml_ng::to_string(&ManagedWorkload::crd())?);
        return Ok(());
    }

    tracing_subscriber::fmt::init();
    info!("Starting image-version-operator {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "/config/config.yaml".to_string());
    info!("Loading config from {}", config_path);
    let config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let http_client = registry::create_client(&config)?;
    let timeout = config.reconcile.registry_timeout();
    let latest_images: Arc<dyn LatestImageSource> = match &config.public_registry {
        Some(public) => {
            info!("Using public registry at {}", public.endpoint);
            Arc::new(PublicRegistryClient::new(
                http_client.clone(),
                &public.endpoint,
                timeout,
            ))
        }
        None => Arc::new(DisabledPublicRegistry),
    };

    info!("Initializing K8s controller");
    let client = controller::create_client().await?;
    let ctx = Arc::new(ControllerContext {
        store: Arc::new(KubeStore::new(client.clone())),
        resolver: Arc::new(OciRegistryResolver::new(
            http_client,
            timeout,
            config.feature_flags.enable_jfrog_artifactory_fallback,
        )),
        latest_images,
        clock: Arc::new(SystemClock),
        auth: RegistryAuth::new(config.registries.clone()),
        tenant_registry: config.tenant_registry.clone(),
        settings: config.reconcile.clone(),
    });

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let readiness = Readiness::default();
    let app = webserver::create_app(readiness.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future(),
    );

    controller::run(client, ctx, readiness, shutdown.clone()).await;
    shutdown.cancel();
    server.await??;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT");
    }
    shutdown.cancel();
}
