use std::{sync::Arc, time::Instant};

use mk_model::{ClusterConfig, EngineOptions, Event, EventKind, MachineName, Node};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{Failed, Orchestrator, ProvisionOutcome, StartHostError, post_start};
use crate::{
    driver::{ConfigContext, DriverDef, UnitState},
    error::{CoreError, ErrorKind, ResultExt},
    host::Host,
    lock::MachineLock,
    system,
};

const DEPRECATED_DRIVERS: [&str; 1] = ["vmwarefusion"];

impl Orchestrator {
    /// Creates or repairs the unit hosting `node` and returns a handle to it.
    ///
    /// The machine lock is held for the whole call. A missing host record selects the
    /// create path; an existing one selects the fix path, which never calls create.
    #[instrument(level = "info", skip_all, fields(cluster = %cc.name, node = %node.name, driver = %cc.driver))]
    pub async fn start_host(
        &self,
        cc: &ClusterConfig,
        node: &Node,
    ) -> Result<ProvisionOutcome, StartHostError> {
        let machine = MachineName::for_node(cc, node);

        let lock = match MachineLock::acquire(machine.as_str(), &self.config.lock).await {
            Ok(lock) => lock,
            Err(e) => {
                let error = e.context("boot lock");
                self.emit_failure(&machine, &error).await;
                return Err(StartHostError {
                    host: None,
                    existed: false,
                    error,
                });
            }
        };
        self.events
            .publish(
                Event::new(EventKind::LockAcquired)
                    .with_machine(machine.as_str())
                    .with_elapsed(lock.waited()),
            )
            .await;

        let result = self.start_locked(cc, node, &machine).await;

        let held = lock.held_for();
        lock.release();
        info!(machine = %machine, ?held, "released machines lock");
        self.events
            .publish(
                Event::new(EventKind::LockReleased)
                    .with_machine(machine.as_str())
                    .with_elapsed(held),
            )
            .await;

        if let Err(e) = &result {
            self.emit_failure(&machine, &e.error).await;
        }
        result
    }

    async fn start_locked(
        &self,
        cc: &ClusterConfig,
        node: &Node,
        machine: &MachineName,
    ) -> Result<ProvisionOutcome, StartHostError> {
        let existed = self.api.exists(machine).await.map_err(|e| StartHostError {
            host: None,
            existed: false,
            error: e.context(format!("exists: {machine}")),
        })?;

        let staged = if existed {
            info!(%machine, "skipping create, using existing machine configuration");
            self.fix_host(cc, node, machine).await
        } else {
            info!(%machine, "provisioning new machine");
            self.create_host(cc, node, machine).await
        };

        match staged {
            Ok((host, node)) => Ok(ProvisionOutcome {
                host,
                existed,
                node,
            }),
            Err(f) => Err(StartHostError {
                host: f.host,
                existed,
                error: f.error,
            }),
        }
    }

    async fn create_host(
        &self,
        cc: &ClusterConfig,
        node: &Node,
        machine: &MachineName,
    ) -> Result<(Host, Node), Failed> {
        let start = Instant::now();
        let def = self.api.registry().resolve(&cc.driver)?;

        show_host_info(cc, def);
        if self.config.warn_deprecated_drivers && DEPRECATED_DRIVERS.contains(&def.name.as_str()) {
            warn!(driver = %def.name, "driver is deprecated and will be removed in a future release");
        }

        self.resolve_conflict(def, machine).await?;

        let ctx = ConfigContext {
            cluster: cc,
            node,
            machine,
            store_path: self.api.paths().home(),
        };
        let dd = def.driver.config(&ctx).context("config")?;
        let data = serde_json::to_vec(&dd)
            .map_err(|e| CoreError::with_source(ErrorKind::InvalidConfig, e).context("marshal"))?;

        let mut host = self.api.new_host(def, machine, &data).context("new host")?;

        self.emit(EventKind::HostCreating, machine).await;
        if let Err(e) = self.timed_create(&host).await {
            let kind = if e.kind() == ErrorKind::CreateTimeout {
                EventKind::CreateTimedOut
            } else {
                EventKind::CreateFailed
            };
            self.events
                .publish(
                    Event::new(kind)
                        .with_machine(machine.as_str())
                        .with_reason(&e)
                        .with_elapsed(start.elapsed()),
                )
                .await;
            return Err(e.context("creating host").into());
        }

        host.record_mut().engine = Some(EngineOptions::for_cluster(&self.config.proxy_env, cc));

        let took = start.elapsed();
        info!(%machine, ?took, "duration metric: create took");
        self.events
            .publish(
                Event::new(EventKind::HostCreated)
                    .with_machine(machine.as_str())
                    .with_elapsed(took),
            )
            .await;

        self.run_post_start(&host).await?;
        let node = self.save_host(&mut host, node).await?;
        Ok((host, node))
    }

    /// Foreign units are never touched; units we own but lost track of are deleted.
    async fn resolve_conflict(&self, def: &DriverDef, machine: &MachineName) -> Result<(), CoreError> {
        let machine_type = def.driver.kind().machine_type();
        let info = match def.driver.inspect(machine).await {
            Ok(info) => info,
            Err(e) => {
                warn!(%machine, error = %e, "failed to check for an existing {machine_type}");
                return Ok(());
            }
        };

        match info {
            None => Ok(()),
            Some(unit) if unit.owned => {
                warn!(
                    %machine,
                    state = %unit.state,
                    "found abandoned {machine_type} from a previous run, deleting it"
                );
                def.driver
                    .remove(machine)
                    .await
                    .with_context(|| format!("delete abandoned {machine_type}"))?;
                self.emit(EventKind::AbandonedUnitRemoved, machine).await;
                Ok(())
            }
            Some(_) => {
                self.emit(EventKind::ConflictDetected, machine).await;
                Err(CoreError::new(
                    ErrorKind::ConflictingResource,
                    format!(
                        "a {machine_type} named \"{machine}\" already exists and was not created by minikube; \
                         delete it or choose a different profile name"
                    ),
                ))
            }
        }
    }

    /// Runs the driver create on its own task, bounded by the configured ceiling.
    async fn timed_create(&self, host: &Host) -> Result<(), CoreError> {
        let ceiling = self.config.create_timeout;
        let driver = Arc::clone(host.driver());
        let machine = host.name().clone();
        let config = host.record().driver_config.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move { driver.create(&machine, &config, token).await });

        match tokio::time::timeout(ceiling, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(CoreError::from(e).context("create")),
            Ok(Err(join)) => Err(CoreError::new(
                ErrorKind::Backend,
                format!("create task failed: {join}"),
            )),
            Err(_) => {
                // The task is detached, not aborted; the token only asks the driver to stop.
                cancel.cancel();
                warn!(machine = %host.name(), ?ceiling, "create did not finish in time, abandoning it");
                Err(CoreError::new(
                    ErrorKind::CreateTimeout,
                    format!("create host timed out in {:.3} seconds", ceiling.as_secs_f64()),
                ))
            }
        }
    }

    async fn fix_host(
        &self,
        cc: &ClusterConfig,
        node: &Node,
        machine: &MachineName,
    ) -> Result<(Host, Node), Failed> {
        let start = Instant::now();
        let mut host = self.api.load(machine).await.context("load")?;
        if host.driver_name() != cc.driver {
            warn!(
                %machine,
                existing = host.driver_name(),
                requested = %cc.driver,
                "ignoring requested driver, the existing host keeps its driver"
            );
        }
        self.emit(EventKind::HostFixing, machine).await;

        let state = host
            .driver()
            .state(machine)
            .await
            .map_err(|e| Failed::with_host(&host, CoreError::from(e).context("state")))?;

        if state == UnitState::Running {
            info!(%machine, "existing {} is running", host.kind().machine_type());
        } else {
            info!(%machine, %state, "restarting existing {}", host.kind().machine_type());
            host.driver()
                .start(machine)
                .await
                .map_err(|e| Failed::with_host(&host, CoreError::from(e).context("driver start")))?;
            self.emit(EventKind::HostStarted, machine).await;
        }

        host.record_mut().engine = Some(EngineOptions::for_cluster(&self.config.proxy_env, cc));

        self.run_post_start(&host).await?;
        let node = self.save_host(&mut host, node).await?;
        info!(%machine, took = ?start.elapsed(), "duration metric: fix took");
        Ok((host, node))
    }

    async fn run_post_start(&self, host: &Host) -> Result<(), Failed> {
        let files_dir = self.api.paths().files_dir();
        match post_start::post_start_setup(host, &files_dir, &self.events).await {
            Ok(()) => {
                self.emit(EventKind::PostStartCompleted, host.name()).await;
                Ok(())
            }
            Err(e) => {
                self.events
                    .publish(
                        Event::new(EventKind::PostStartFailed)
                            .with_machine(host.name().as_str())
                            .with_reason(&e),
                    )
                    .await;
                Err(Failed::with_host(host, e.context("post-start")))
            }
        }
    }

    /// Learns the unit address, then persists the record.
    async fn save_host(&self, host: &mut Host, node: &Node) -> Result<Node, Failed> {
        let machine = host.name().clone();
        let ip = match host.driver().ip(&machine).await {
            Ok(ip) => ip,
            Err(e) => return Err(Failed::with_host(host, CoreError::from(e).context("ip"))),
        };

        host.record_mut().ip = Some(ip.clone());
        host.record_mut().touch();
        if let Err(e) = self.api.save(host).await {
            return Err(Failed::with_host(host, e.context("save")));
        }
        self.emit(EventKind::HostSaved, &machine).await;

        let mut node = node.clone();
        node.ip = ip;
        Ok(node)
    }

    async fn emit_failure(&self, machine: &MachineName, error: &CoreError) {
        warn!(%machine, kind = %error.kind(), error = %error, "start host failed");
        self.events
            .publish(
                Event::new(EventKind::StartFailed)
                    .with_machine(machine.as_str())
                    .with_reason(error.kind().as_str()),
            )
            .await;
    }
}

fn show_host_info(cc: &ClusterConfig, def: &DriverDef) {
    let kind = def.driver.kind();
    if kind.is_bare_metal() {
        info!(
            os = %system::os_info(),
            "running on localhost (CPUs={}, Memory={}MB, Disk={}MB)",
            cc.cpus, cc.memory_mb, cc.disk_size_mb
        );
        return;
    }
    info!(
        "creating {} {} (CPUs={}, Memory={}MB, Disk={}MB)",
        def.name,
        kind.machine_type(),
        cc.cpus,
        cc.memory_mb,
        cc.disk_size_mb
    );
}
