use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use mk_core::{
    Cmd, CommandRunner, ConfigContext, Driver, DriverDef, DriverError, DriverRegistry, ErrorKind,
    FileAsset, FileHostStore, LockSpec, MachineApi, MiniPath, Orchestrator, OrchestratorConfig,
    Priority, RunResult, RunnerError, UnitInfo, UnitState,
};
use mk_model::{ClusterConfig, DriverKind, MachineName, Node, REQUIRED_DIRECTORIES};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeRunner {
    cmds: Mutex<Vec<Cmd>>,
    copies: Mutex<Vec<String>>,
    fail_mkdir: AtomicBool,
}

impl FakeRunner {
    fn mkdir_calls(&self) -> Vec<Cmd> {
        self.cmds
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == "sudo" && c.args.first().map(String::as_str) == Some("mkdir"))
            .cloned()
            .collect()
    }

    fn ran(&self, program: &str) -> bool {
        self.cmds.lock().unwrap().iter().any(|c| c.program == program)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run_cmd(&self, cmd: &Cmd) -> Result<RunResult, RunnerError> {
        self.cmds.lock().unwrap().push(cmd.clone());
        if cmd.program == "sudo" && self.fail_mkdir.load(Ordering::SeqCst) {
            return Err(RunnerError::NonZeroExit {
                cmd: cmd.to_string(),
                code: 1,
                stderr: "read-only file system".into(),
            });
        }
        if cmd.program == "cat" {
            return Ok(RunResult {
                stdout: "NAME=Buildroot\nPRETTY_NAME=\"Buildroot 2019.02.10\"\n".into(),
                ..Default::default()
            });
        }
        Ok(RunResult::default())
    }

    async fn copy(&self, asset: &FileAsset) -> Result<(), RunnerError> {
        self.copies.lock().unwrap().push(asset.target_path());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
struct Calls {
    create: AtomicUsize,
    start: AtomicUsize,
    remove: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Calls {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeDriver {
    kind: DriverKind,
    calls: Calls,
    create_delay: Duration,
    unit: Mutex<Option<UnitInfo>>,
    runner: Arc<FakeRunner>,
    saw_cancel: AtomicBool,
}

impl FakeDriver {
    fn new(kind: DriverKind) -> Self {
        Self {
            kind,
            calls: Calls::default(),
            create_delay: Duration::ZERO,
            unit: Mutex::new(None),
            runner: Arc::new(FakeRunner::default()),
            saw_cancel: AtomicBool::new(false),
        }
    }

    fn with_create_delay(mut self, d: Duration) -> Self {
        self.create_delay = d;
        self
    }

    fn with_unit(self, owned: bool, state: UnitState) -> Self {
        *self.unit.lock().unwrap() = Some(UnitInfo { owned, state });
        self
    }

    fn set_state(&self, state: UnitState) {
        if let Some(u) = self.unit.lock().unwrap().as_mut() {
            u.state = state;
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn config(&self, ctx: &ConfigContext<'_>) -> Result<serde_json::Value, DriverError> {
        Ok(serde_json::json!({
            "machine": ctx.machine.as_str(),
            "cpus": ctx.cluster.cpus,
        }))
    }

    async fn inspect(&self, _m: &MachineName) -> Result<Option<UnitInfo>, DriverError> {
        Ok(*self.unit.lock().unwrap())
    }

    async fn create(
        &self,
        _m: &MachineName,
        _config: &serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<(), DriverError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        self.calls.enter();
        let res = tokio::select! {
            _ = tokio::time::sleep(self.create_delay) => Ok(()),
            _ = cancel.cancelled() => {
                self.saw_cancel.store(true, Ordering::SeqCst);
                Err(DriverError::Cancelled)
            }
        };
        self.calls.leave();
        if res.is_ok() {
            *self.unit.lock().unwrap() = Some(UnitInfo {
                owned: true,
                state: UnitState::Running,
            });
        }
        res
    }

    async fn start(&self, _m: &MachineName) -> Result<(), DriverError> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        self.calls.enter();
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.calls.leave();
        self.set_state(UnitState::Running);
        Ok(())
    }

    async fn stop(&self, _m: &MachineName) -> Result<(), DriverError> {
        self.set_state(UnitState::Stopped);
        Ok(())
    }

    async fn remove(&self, _m: &MachineName) -> Result<(), DriverError> {
        self.calls.remove.fetch_add(1, Ordering::SeqCst);
        *self.unit.lock().unwrap() = None;
        Ok(())
    }

    async fn state(&self, _m: &MachineName) -> Result<UnitState, DriverError> {
        Ok(self
            .unit
            .lock()
            .unwrap()
            .map(|u| u.state)
            .unwrap_or(UnitState::Missing))
    }

    async fn ip(&self, _m: &MachineName) -> Result<String, DriverError> {
        Ok("192.168.49.2".into())
    }

    fn runner(&self, _m: &MachineName) -> Result<Arc<dyn CommandRunner>, DriverError> {
        Ok(self.runner.clone())
    }
}

fn orchestrator(home: &TempDir, driver: Arc<FakeDriver>, create_timeout: Duration) -> Orchestrator {
    let paths = MiniPath::new(home.path());
    let mut registry = DriverRegistry::new();
    registry
        .register(DriverDef::new(driver, Priority::Default))
        .unwrap();
    let store = Arc::new(FileHostStore::new(paths.machines_dir()));
    let api = Arc::new(MachineApi::new(Arc::new(registry), store, paths.clone()));

    let config = OrchestratorConfig::new(&paths)
        .with_lock(
            LockSpec::new(paths.locks_dir())
                .with_timeout(Duration::from_secs(10))
                .with_delay(Duration::from_millis(10)),
        )
        .with_create_timeout(create_timeout);
    Orchestrator::new(api, config)
}

fn cluster(name: &str) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        driver: "fake".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_then_fix_calls_create_once() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic));
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let cc = cluster("p1");
    let node = cc.nodes[0].clone();

    let first = orch.start_host(&cc, &node).await.unwrap();
    assert!(!first.existed);
    assert_eq!(first.host.name().as_str(), "p1");
    assert_eq!(first.node.ip, "192.168.49.2");
    assert_eq!(driver.calls.create.load(Ordering::SeqCst), 1);

    let second = orch.start_host(&cc, &node).await.unwrap();
    assert!(second.existed);
    assert_eq!(driver.calls.create.load(Ordering::SeqCst), 1);
    assert_eq!(driver.calls.start.load(Ordering::SeqCst), 0);

    let record = second.host.record();
    assert_eq!(record.ip.as_deref(), Some("192.168.49.2"));
    assert_eq!(record.driver_config["machine"], "p1");
    assert_eq!(record.auth.store_path, home.path());
    assert_eq!(
        record.engine.as_ref().unwrap().insecure_registry[0],
        mk_model::DEFAULT_SERVICE_CIDR
    );

    // post-start ran on both paths
    assert_eq!(driver.runner.mkdir_calls().len(), 2);
}

#[tokio::test]
async fn fix_path_starts_stopped_unit() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Vm));
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let cc = cluster("p1");
    let node = cc.nodes[0].clone();

    orch.start_host(&cc, &node).await.unwrap();
    driver.set_state(UnitState::Stopped);

    let out = orch.start_host(&cc, &node).await.unwrap();
    assert!(out.existed);
    assert_eq!(driver.calls.start.load(Ordering::SeqCst), 1);
    assert_eq!(driver.calls.create.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn create_timeout_is_bounded_and_signals_cancel() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic).with_create_delay(Duration::from_secs(30)));
    let orch = orchestrator(&home, driver.clone(), Duration::from_millis(200));
    let cc = cluster("slow");

    let started = Instant::now();
    let err = orch.start_host(&cc, &cc.nodes[0]).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(err.kind(), ErrorKind::CreateTimeout);
    assert!(err.kind().is_retryable());
    assert!(err.host.is_none());
    assert!(!err.existed);
    assert_eq!(err.error.context_chain()[0], "creating host");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(driver.saw_cancel.load(Ordering::SeqCst));

    // nothing was persisted, so the next start takes the create path again
    let machine = MachineName::from("slow");
    assert!(!orch.api().exists(&machine).await.unwrap());
}

#[tokio::test]
async fn foreign_unit_is_a_conflict_and_is_not_deleted() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic).with_unit(false, UnitState::Running));
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let cc = cluster("p1");

    let err = orch.start_host(&cc, &cc.nodes[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictingResource);
    assert!(err.error.requires_user_action());
    assert_eq!(driver.calls.remove.load(Ordering::SeqCst), 0);
    assert_eq!(driver.calls.create.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn abandoned_owned_unit_is_recreated() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic).with_unit(true, UnitState::Stopped));
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let cc = cluster("p1");

    let out = orch.start_host(&cc, &cc.nodes[0]).await.unwrap();
    assert!(!out.existed);
    assert_eq!(driver.calls.remove.load(Ordering::SeqCst), 1);
    assert_eq!(driver.calls.create.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_driver_is_unsupported() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic));
    let orch = orchestrator(&home, driver, Duration::from_secs(5));
    let mut cc = cluster("p1");
    cc.driver = "hyperkit".into();

    let err = orch.start_host(&cc, &cc.nodes[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedDriver);
    assert!(!err.kind().is_retryable());
}

#[tokio::test]
async fn post_start_failure_returns_the_host() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic));
    driver.runner.fail_mkdir.store(true, Ordering::SeqCst);
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let cc = cluster("p1");

    let err = orch.start_host(&cc, &cc.nodes[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PostStart);
    assert_eq!(err.error.context_chain()[0], "post-start");
    assert!(err.to_string().contains("sudo mkdir (fake)"));
    assert_eq!(err.host.as_ref().map(|h| h.name().as_str()), Some("p1"));
}

#[tokio::test]
async fn engine_env_is_applied_after_create_and_deduped() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic));
    driver.runner.fail_mkdir.store(true, Ordering::SeqCst);
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let mut cc = cluster("p1");
    cc.docker_env = vec!["HTTP_PROXY=http://p:3128".into(), "FOO=1".into(), "HTTP_PROXY=http://p:3128".into()];

    // create succeeded, post-start failed: the handle already carries the overrides
    let err = orch.start_host(&cc, &cc.nodes[0]).await.unwrap_err();
    assert_eq!(driver.calls.create.load(Ordering::SeqCst), 1);
    let host = err.host.unwrap();
    let engine = host.record().engine.as_ref().unwrap();
    assert_eq!(engine.env.iter().collect::<Vec<_>>(), ["HTTP_PROXY=http://p:3128", "FOO=1"]);
}

#[tokio::test]
async fn container_worker_node_gets_directories_and_fingerprint() {
    let home = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(home.path().join("files/etc/ssl/certs")).unwrap();
    std::fs::write(home.path().join("files/etc/ssl/certs/corp.pem"), b"pem").unwrap();

    let driver = Arc::new(FakeDriver::new(DriverKind::Kic));
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let mut cc = cluster("p1");
    cc.nodes.push(Node::worker(2));
    let worker = cc.nodes[1].clone();

    let out = orch.start_host(&cc, &worker).await.unwrap();
    assert_eq!(out.host.name().as_str(), "p1-m02");
    assert_eq!(out.node.name, "m02");

    let mkdirs = driver.runner.mkdir_calls();
    assert_eq!(mkdirs.len(), 1);
    let dirs: Vec<&str> = mkdirs[0].args[2..].iter().map(String::as_str).collect();
    assert_eq!(dirs, REQUIRED_DIRECTORIES);

    assert!(driver.runner.ran("cat"));
    assert_eq!(
        *driver.runner.copies.lock().unwrap(),
        vec!["/etc/ssl/certs/corp.pem".to_string()]
    );
}

#[tokio::test]
async fn mock_kind_skips_post_start() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Mock));
    let orch = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let cc = cluster("p1");

    orch.start_host(&cc, &cc.nodes[0]).await.unwrap();
    assert!(driver.runner.cmds.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_for_one_machine_are_serialized() {
    let home = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new(DriverKind::Kic).with_create_delay(Duration::from_millis(300)));
    // two orchestrators stand in for two processes sharing a home directory
    let a = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let b = orchestrator(&home, driver.clone(), Duration::from_secs(5));
    let cc = cluster("p1");
    let node = cc.nodes[0].clone();

    let (ra, rb) = tokio::join!(a.start_host(&cc, &node), b.start_host(&cc, &node));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(driver.calls.create.load(Ordering::SeqCst), 1);
    assert!(ra.existed != rb.existed);
    assert_eq!(driver.calls.max_in_flight.load(Ordering::SeqCst), 1);
}
