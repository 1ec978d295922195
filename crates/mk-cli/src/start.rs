use std::{sync::Arc, time::Duration};

use anyhow::{Context, anyhow, bail};
use mk_cache::{CacheCoordinator, CacheGroup, CacheOptions, DaemonImageStore, HttpBinaries, HttpPreload};
use mk_core::{
    DriverRegistry, EventBus, FileHostStore, MachineApi, MiniPath, Orchestrator, OrchestratorConfig, Subscribe,
    add_host_alias, proxy_env_from_process,
};
use mk_model::CONTROL_PLANE_ALIAS;
use mk_exec::{Oci, OciBinary, register_defaults};
use mk_observe::Journal;
use mk_prometheus::PrometheusMetrics;
use tracing::{info, warn};

use crate::cli::StartArgs;

pub async fn run(args: StartArgs) -> anyhow::Result<()> {
    let paths = MiniPath::from_env();
    info!(home = %paths.home().display(), "using home directory");

    let mut registry = DriverRegistry::new();
    register_defaults(&mut registry)?;

    let driver = match &args.driver {
        Some(name) => registry.resolve(name)?.clone(),
        None => registry
            .choose_default()
            .await
            .cloned()
            .ok_or_else(|| anyhow!("unable to pick a default driver; pass --driver"))?,
    };
    let status = driver.driver.status().await;
    if !status.healthy {
        let fix = status.fix.as_deref().unwrap_or("see the driver documentation");
        bail!(
            "driver {} is not usable: {} ({fix})",
            driver.name,
            status.error.as_deref().unwrap_or("unknown error")
        );
    }
    let kind = driver.driver.kind();
    info!(driver = %driver.name, priority = ?driver.priority, "using driver");

    let mut cc = args.cluster_config(&driver.name);
    cc.validate().context("invalid cluster configuration")?;

    let metrics = PrometheusMetrics::new()?;
    let events = EventBus::new(vec![
        Arc::new(Journal::new()) as Arc<dyn Subscribe>,
        Arc::new(metrics.clone()) as Arc<dyn Subscribe>,
    ]);

    let binary = driver.name.parse::<OciBinary>().unwrap_or(OciBinary::Docker);
    let options = CacheOptions::new(&paths)
        .with_cache_images(args.cache_images)
        .with_download_only(args.download_only)
        .with_preload(args.preload);
    let cache = CacheCoordinator::new(
        options,
        Arc::new(DaemonImageStore::new(Oci::new(binary))),
        Arc::new(HttpPreload::new(paths.preload_dir())),
        Arc::new(HttpBinaries::new(paths.clone())),
    )
    .with_events(events.clone());

    let k8s = cc.kubernetes.clone();
    let mut backend_group = CacheGroup::new("backend-artifacts");
    let mut images_group = CacheGroup::new("cache-images");
    let selection = cache
        .begin_download_backend_artifacts(&mut backend_group, &cc, kind)
        .await;
    if kind.caches_kubernetes_images() {
        cache
            .begin_cache_images(
                &mut images_group,
                &k8s.image_repository,
                &k8s.kubernetes_version,
                &k8s.container_runtime,
            )
            .await;
    }

    if args.download_only {
        cache
            .handle_download_only(images_group, backend_group, &k8s.kubernetes_version, &cc.cache_images)
            .await?;
        println!("Download complete!");
        return write_metrics(&args, &metrics).await;
    }

    cache.wait_download_backend_artifacts(backend_group).await?;
    selection.apply(&mut cc);

    let api = Arc::new(MachineApi::new(
        Arc::new(registry),
        Arc::new(FileHostStore::new(paths.machines_dir())),
        paths.clone(),
    ));
    let config = OrchestratorConfig::new(&paths)
        .with_create_timeout(Duration::from_secs(args.create_timeout))
        .with_proxy_env(proxy_env_from_process());
    let orchestrator = Orchestrator::new(api, config).with_events(events);

    let mut control_plane_ip: Option<String> = None;
    for node in cc.nodes.clone() {
        match orchestrator.start_host(&cc, &node).await {
            Ok(out) => {
                info!(
                    host = %out.host.name(),
                    ip = %out.node.ip,
                    existed = out.existed,
                    "node is up"
                );
                let cp_ip = control_plane_ip.get_or_insert_with(|| out.node.ip.clone()).clone();
                if !kind.is_mock() && !cp_ip.is_empty() {
                    let runner = out.host.runner().context("command runner")?;
                    add_host_alias(runner.as_ref(), CONTROL_PLANE_ALIAS, &cp_ip)
                        .await
                        .with_context(|| format!("add {CONTROL_PLANE_ALIAS} to {}", out.host.name()))?;
                }
            }
            Err(e) => {
                if let Some(host) = &e.host {
                    warn!(host = %host.name(), "host was left behind in the backend");
                }
                if e.error.requires_user_action() {
                    warn!(kind = e.kind().as_str(), "this failure needs user action");
                }
                return Err(anyhow!(e).context(format!("failed to start node {:?}", node.name)));
            }
        }
    }

    cache.wait_cache_images(images_group).await;
    info!(profile = %cc.name, "done");
    write_metrics(&args, &metrics).await
}

async fn write_metrics(args: &StartArgs, metrics: &PrometheusMetrics) -> anyhow::Result<()> {
    if let Some(path) = &args.metrics_out {
        tokio::fs::write(path, metrics.render()?)
            .await
            .with_context(|| format!("write metrics to {}", path.display()))?;
    }
    Ok(())
}
