//! End-to-end orchestration with mock collaborators.

use async_trait::async_trait;
use linuxvm::handoff::read_handoff;
use linuxvm::subsystems::{ConfigServer, NetworkStack, VmRuntime};
use linuxvm::supervisor::SupervisorState;
use linuxvm::util::NofileLimit;
use linuxvm::{
    CancelScope, Cmdline, Collaborators, LimitPolicy, LinuxvmError, LinuxvmResult, Orchestrator,
    RuntimeOptions, VmConfig, VmOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const BOUND: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum Behavior {
    FailNow,
    WaitForCancel,
    ExitOk,
}

/// Observations made by one mock collaborator.
#[derive(Default)]
struct Observer {
    starts: AtomicUsize,
    saw_handoff: AtomicBool,
    saw_cancel: AtomicBool,
}

impl Observer {
    async fn act(
        &self,
        name: &str,
        behavior: Behavior,
        scope: CancelScope,
        rootfs: &Path,
    ) -> LinuxvmResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let ready = rootfs.join("bootstrap").is_file()
            && rootfs.join(".linuxvm/vmconfig.json").is_file();
        self.saw_handoff.store(ready, Ordering::SeqCst);

        match behavior {
            Behavior::FailNow => Err(LinuxvmError::Network(format!("{} cannot bind", name))),
            Behavior::WaitForCancel => {
                scope.cancelled().await;
                self.saw_cancel.store(true, Ordering::SeqCst);
                Ok(())
            }
            Behavior::ExitOk => Ok(()),
        }
    }
}

struct MockNetwork(Arc<Observer>, Behavior);
struct MockConfigServer(Arc<Observer>, Behavior);
struct MockVm(Arc<Observer>, Behavior, Arc<std::sync::Mutex<Option<Cmdline>>>);

#[async_trait]
impl NetworkStack for MockNetwork {
    async fn start(&self, scope: CancelScope, config: VmConfig) -> LinuxvmResult<()> {
        self.0.act("network", self.1, scope, &config.rootfs).await
    }
}

#[async_trait]
impl ConfigServer for MockConfigServer {
    async fn serve(&self, scope: CancelScope, config: Arc<VmConfig>) -> LinuxvmResult<()> {
        self.0.act("config-server", self.1, scope, &config.rootfs).await
    }
}

#[async_trait]
impl VmRuntime for MockVm {
    async fn start(&self, scope: CancelScope, config: VmConfig, cmdline: Cmdline) -> LinuxvmResult<()> {
        *self.2.lock().unwrap() = Some(cmdline);
        self.0.act("vm", self.1, scope, &config.rootfs).await
    }
}

struct Harness {
    root: tempfile::TempDir,
    rootfs: PathBuf,
    temp_root: PathBuf,
    network: Arc<Observer>,
    config_server: Arc<Observer>,
    vm: Arc<Observer>,
    vm_cmdline: Arc<std::sync::Mutex<Option<Cmdline>>>,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let rootfs = root.path().join("rootfs");
        let temp_root = root.path().join("tmp");
        std::fs::create_dir(&rootfs).unwrap();
        std::fs::create_dir(&temp_root).unwrap();
        std::fs::write(root.path().join("bootstrap-bin"), b"\x7fELF fake").unwrap();

        Self {
            root,
            rootfs,
            temp_root,
            network: Arc::default(),
            config_server: Arc::default(),
            vm: Arc::default(),
            vm_cmdline: Arc::default(),
        }
    }

    fn runtime(&self) -> RuntimeOptions {
        RuntimeOptions {
            bootstrap_path: Some(self.root.path().join("bootstrap-bin")),
            temp_root: Some(self.temp_root.clone()),
            limit_policy: LimitPolicy::BestEffort,
            ..Default::default()
        }
    }

    fn orchestrator(&self, runtime: RuntimeOptions, network: Behavior, vm: Behavior) -> Orchestrator {
        let collaborators = Collaborators {
            network: Arc::new(MockNetwork(Arc::clone(&self.network), network)),
            config_server: Arc::new(MockConfigServer(
                Arc::clone(&self.config_server),
                Behavior::WaitForCancel,
            )),
            vm: Arc::new(MockVm(Arc::clone(&self.vm), vm, Arc::clone(&self.vm_cmdline))),
        };
        Orchestrator::new(runtime, collaborators).with_host_cpus(4)
    }

    fn options(&self) -> VmOptions {
        VmOptions {
            rootfs: self.rootfs.clone(),
            cpus: Some(2),
            memory_mib: Some(256),
            command: vec!["sh".into(), "-c".into(), "echo hi".into()],
            ..Default::default()
        }
    }

    fn observers(&self) -> [&Arc<Observer>; 3] {
        [&self.network, &self.config_server, &self.vm]
    }

    fn workspaces(&self) -> usize {
        std::fs::read_dir(&self.temp_root).unwrap().count()
    }
}

#[tokio::test]
async fn test_successful_run_dispatches_each_subsystem_once() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(h.runtime(), Behavior::WaitForCancel, Behavior::ExitOk);

    let report = tokio::time::timeout(BOUND, orchestrator.run(h.options(), CancelScope::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.supervisor.state, SupervisorState::Completed);
    assert_eq!(
        report.pipeline.task_names(),
        ["raise_limits", "workspace", "guest_handoff"]
    );
    for observer in h.observers() {
        assert_eq!(observer.starts.load(Ordering::SeqCst), 1);
        assert!(observer.saw_handoff.load(Ordering::SeqCst));
    }

    assert_eq!(report.handoff.document, h.rootfs.join(".linuxvm/vmconfig.json"));
    assert!(report.handoff.bootstrap_copied);

    let doc = read_handoff(&h.rootfs).unwrap();
    assert_eq!(doc.config.memory_in_mb, 256);
    assert_eq!(doc.config.cpus, 2);
    assert!(doc.config.data_disk.is_empty());
    assert!(doc.config.mounts.is_empty());
    assert_eq!(doc.cmdline.target_bin_args, ["sh", "-c", "echo hi"]);
    assert!(
        doc.config
            .gvproxy_endpoint
            .starts_with(&format!("unix://{}", report.workspace.display()))
    );

    let cmdline = h.vm_cmdline.lock().unwrap().clone().unwrap();
    assert_eq!(cmdline, doc.cmdline);

    assert!(!report.workspace.exists());
    assert_eq!(h.workspaces(), 0);
}

#[tokio::test]
async fn test_empty_rootfs_fails_before_any_workspace() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(h.runtime(), Behavior::WaitForCancel, Behavior::ExitOk);
    let mut options = h.options();
    options.rootfs = PathBuf::new();

    let err = orchestrator.run(options, CancelScope::new()).await.unwrap_err();

    assert!(matches!(err, LinuxvmError::Validation(_)));
    assert_eq!(h.workspaces(), 0);
    for observer in h.observers() {
        assert_eq!(observer.starts.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_network_failure_cancels_siblings() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(h.runtime(), Behavior::FailNow, Behavior::WaitForCancel);

    let err = tokio::time::timeout(BOUND, orchestrator.run(h.options(), CancelScope::new()))
        .await
        .expect("run must not hang")
        .unwrap_err();

    assert_eq!(err.subsystem(), Some("network"));
    assert!(!err.is_fatal_before_dispatch());
    assert!(h.config_server.saw_cancel.load(Ordering::SeqCst));
    assert!(h.vm.saw_cancel.load(Ordering::SeqCst));
    assert_eq!(h.workspaces(), 0);
}

#[tokio::test]
async fn test_handoff_failure_starts_nothing() {
    let h = Harness::new();
    let mut runtime = h.runtime();
    runtime.bootstrap_path = Some(h.root.path().join("missing-bootstrap"));
    let orchestrator = h.orchestrator(runtime, Behavior::WaitForCancel, Behavior::ExitOk);

    let err = orchestrator.run(h.options(), CancelScope::new()).await.unwrap_err();

    assert!(matches!(err, LinuxvmError::Handoff { .. }));
    assert!(!h.rootfs.join(".linuxvm/vmconfig.json").exists());
    assert_eq!(h.workspaces(), 0);
    for observer in h.observers() {
        assert_eq!(observer.starts.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_external_cancel_completes_run() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(h.runtime(), Behavior::WaitForCancel, Behavior::WaitForCancel);
    let scope = CancelScope::new();

    let run = tokio::spawn(orchestrator.run(h.options(), scope.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    scope.cancel();

    let report = tokio::time::timeout(BOUND, run).await.unwrap().unwrap().unwrap();
    assert_eq!(report.supervisor.state, SupervisorState::Completed);
    for observer in h.observers() {
        assert!(observer.saw_cancel.load(Ordering::SeqCst));
    }
}

#[tokio::test]
async fn test_keep_workspace_leaves_directory() {
    let h = Harness::new();
    let mut runtime = h.runtime();
    runtime.keep_workspace = true;
    let orchestrator = h.orchestrator(runtime, Behavior::WaitForCancel, Behavior::ExitOk);

    let report = orchestrator.run(h.options(), CancelScope::new()).await.unwrap();

    assert!(report.workspace.is_dir());
    assert_eq!(h.workspaces(), 1);
}

#[tokio::test]
async fn test_runs_get_distinct_endpoints() {
    let h = Harness::new();
    let mut endpoints = Vec::new();

    for _ in 0..2 {
        let orchestrator = h.orchestrator(h.runtime(), Behavior::WaitForCancel, Behavior::ExitOk);
        orchestrator.run(h.options(), CancelScope::new()).await.unwrap();
        let doc = read_handoff(&h.rootfs).unwrap();
        endpoints.push((doc.config.gvproxy_endpoint, doc.config.network_stack_backend));
    }

    assert_ne!(endpoints[0].0, endpoints[1].0);
    assert_ne!(endpoints[0].1, endpoints[1].1);
}

fn denied_limit() -> LinuxvmResult<NofileLimit> {
    Err(LinuxvmError::ResourceLimit("setrlimit(RLIMIT_NOFILE): EPERM".into()))
}

#[tokio::test]
async fn test_limit_failure_is_fatal_by_default() {
    let h = Harness::new();
    let mut runtime = h.runtime();
    runtime.limit_policy = LimitPolicy::Strict;
    let orchestrator = h
        .orchestrator(runtime, Behavior::WaitForCancel, Behavior::ExitOk)
        .with_limit_raiser(denied_limit);

    let err = orchestrator.run(h.options(), CancelScope::new()).await.unwrap_err();

    assert!(matches!(err, LinuxvmError::ResourceLimit(_)));
    assert!(err.is_fatal_before_dispatch());
    assert_eq!(h.workspaces(), 0);
    assert!(!h.rootfs.join(".linuxvm/vmconfig.json").exists());
    for observer in h.observers() {
        assert_eq!(observer.starts.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_limit_failure_tolerated_when_best_effort() {
    let h = Harness::new();
    let orchestrator = h
        .orchestrator(h.runtime(), Behavior::WaitForCancel, Behavior::ExitOk)
        .with_limit_raiser(denied_limit);

    let report = tokio::time::timeout(BOUND, orchestrator.run(h.options(), CancelScope::new()))
        .await
        .unwrap()
        .unwrap();

    assert!(report.nofile.is_none());
    assert_eq!(report.supervisor.state, SupervisorState::Completed);
    for observer in h.observers() {
        assert_eq!(observer.starts.load(Ordering::SeqCst), 1);
    }
}

fn runtime_without_shim(h: &Harness) -> RuntimeOptions {
    RuntimeOptions {
        gvproxy_path: Some(h.root.path().join("gvproxy")),
        shim_path: None,
        ..h.runtime()
    }
}

#[tokio::test]
async fn test_invalid_input_reported_before_binary_lookup() {
    let h = Harness::new();
    let mut options = h.options();
    options.cpus = Some(0);

    let err = Orchestrator::from_runtime(runtime_without_shim(&h))
        .run(options, CancelScope::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LinuxvmError::Validation(_)));
    assert_eq!(h.workspaces(), 0);
}

#[tokio::test]
async fn test_missing_helper_binary_fails_before_workspace() {
    let h = Harness::new();

    let err = Orchestrator::from_runtime(runtime_without_shim(&h))
        .with_host_cpus(4)
        .run(h.options(), CancelScope::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LinuxvmError::MissingBinary(ref m) if m.contains("linuxvm-shim")));
    assert!(err.is_fatal_before_dispatch());
    assert_eq!(h.workspaces(), 0);
}
