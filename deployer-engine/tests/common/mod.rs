//! Scripted collaborators shared by the engine's integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use deployer_core::domain::commit::Diff;
use deployer_core::domain::job::{Actor, Job, JobStatus};
use deployer_core::domain::phase::Phase;
use deployer_core::dto::deploy::DeployRequest;
use deployer_core::dto::job::Page;
use deployer_engine::Coordinator;
use deployer_engine::repository::{DiffError, DiffSource, JobStore, MemoryJobStore, StoreError};
use deployer_engine::sandbox::{
    LogFrame, LogStream, ProviderError, SandboxHandle, SandboxProvider, SandboxSpec,
};
use deployer_engine::service::{
    ExecutorConfig, LifecycleObserver, LogMultiplexer, SandboxExecutionService,
};
use futures::{StreamExt, future, stream};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub fn request(job_id: i64) -> DeployRequest {
    DeployRequest {
        job_id,
        owner: "acme".to_string(),
        name: "api".to_string(),
        ssh_url: "git@github.com:acme/api.git".to_string(),
        http_url: "https://github.com/acme/api".to_string(),
        task: "deploy".to_string(),
        environment: "prod".to_string(),
        git_ref: "main".to_string(),
        sha: format!("sha-{}", job_id),
        author: Actor {
            login: "octocat".to_string(),
            ..Default::default()
        },
    }
}

/// Provider calls, by operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Calls {
    pub pull: usize,
    pub create: usize,
    pub start: usize,
    pub wait: usize,
    pub stop: usize,
    pub remove: usize,
    pub logs: usize,
}

#[derive(Default)]
struct State {
    calls: Calls,
    live: HashSet<String>,
    specs: Vec<SandboxSpec>,
}

/// In-process sandbox provider
///
/// `wait` blocks until the test calls [`FakeProvider::exit_with`] or the
/// sandbox is stopped, which exits it with 137. A gated pull blocks until
/// [`FakeProvider::open_pull`].
pub struct FakeProvider {
    output: Vec<LogFrame>,
    fail_pull: bool,
    fail_start: bool,
    fail_wait: bool,
    pull_open: watch::Sender<bool>,
    exit: watch::Sender<Option<i32>>,
    state: Mutex<State>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            fail_pull: false,
            fail_start: false,
            fail_wait: false,
            pull_open: watch::Sender::new(true),
            exit: watch::Sender::new(None),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_output(mut self, output: Vec<LogFrame>) -> Self {
        self.output = output;
        self
    }

    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// `wait` reports an error instead of an exit code
    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    /// `pull_image` blocks until [`FakeProvider::open_pull`] is called
    pub fn gated_pull(self) -> Self {
        self.pull_open.send_replace(false);
        self
    }

    pub fn open_pull(&self) {
        self.pull_open.send_replace(true);
    }

    /// Makes the running sandbox exit with `code`
    pub fn exit_with(&self, code: i32) {
        self.exit.send_replace(Some(code));
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names of sandboxes created and not yet removed
    pub fn live(&self) -> Vec<String> {
        self.state.lock().unwrap().live.iter().cloned().collect()
    }

    pub fn specs(&self) -> Vec<SandboxSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    /// Resolves once some execution is blocked in `wait`
    pub async fn wait_until_waiting(&self) {
        self.wait_for("wait", |calls| calls.wait > 0).await;
    }

    /// Polls the call counters until `ready` holds
    pub async fn wait_for(&self, what: &str, ready: impl Fn(&Calls) -> bool) {
        let reached = tokio::time::timeout(Duration::from_secs(5), async {
            while !ready(&self.calls()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "provider never reached {}", what);
    }

    fn refused(&self, command: &str, handle: &SandboxHandle) -> ProviderError {
        ProviderError::Command {
            command: format!("fake {}", command),
            code: Some(125),
            stderr: format!("no such container {}", handle.name()),
        }
    }

    fn refused_pull(&self, image: &str) -> ProviderError {
        ProviderError::Command {
            command: "fake pull".to_string(),
            code: Some(125),
            stderr: format!("manifest unknown: {}", image),
        }
    }

    fn is_live(&self, handle: &SandboxHandle) -> bool {
        self.state.lock().unwrap().live.contains(handle.name())
    }
}

async fn exit_code(mut exit: watch::Receiver<Option<i32>>) -> i32 {
    loop {
        let current = *exit.borrow_and_update();
        if let Some(code) = current {
            return code;
        }
        if exit.changed().await.is_err() {
            return -1;
        }
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn pull_image(&self, image: &str) -> Result<(), ProviderError> {
        self.state.lock().unwrap().calls.pull += 1;

        let mut open = self.pull_open.subscribe();
        if open.wait_for(|open| *open).await.is_err() {
            return Err(self.refused_pull(image));
        }

        if self.fail_pull {
            return Err(self.refused_pull(image));
        }
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.create += 1;
        if !state.live.insert(spec.name.clone()) {
            return Err(ProviderError::Command {
                command: "fake create".to_string(),
                code: Some(125),
                stderr: format!("name {} is already in use", spec.name),
            });
        }
        state.specs.push(spec.clone());
        Ok(SandboxHandle::new(spec.name.clone()))
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        self.state.lock().unwrap().calls.start += 1;
        if self.fail_start || !self.is_live(handle) {
            return Err(self.refused("start", handle));
        }
        Ok(())
    }

    async fn wait(&self, handle: &SandboxHandle) -> Result<i32, ProviderError> {
        self.state.lock().unwrap().calls.wait += 1;
        if self.fail_wait || !self.is_live(handle) {
            return Err(self.refused("wait", handle));
        }
        Ok(exit_code(self.exit.subscribe()).await)
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        self.state.lock().unwrap().calls.stop += 1;
        if !self.is_live(handle) {
            return Err(self.refused("stop", handle));
        }
        self.exit.send_if_modified(|exit| {
            if exit.is_none() {
                *exit = Some(137);
                true
            } else {
                false
            }
        });
        Ok(())
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.remove += 1;
        if !state.live.remove(handle.name()) {
            return Err(self.refused("rm", handle));
        }
        Ok(())
    }

    async fn logs(&self, handle: &SandboxHandle, follow: bool) -> Result<LogStream, ProviderError> {
        self.state.lock().unwrap().calls.logs += 1;
        if !self.is_live(handle) {
            return Err(self.refused("logs", handle));
        }

        let frames = stream::iter(
            self.output
                .clone()
                .into_iter()
                .map(Ok::<LogFrame, ProviderError>),
        );
        if !follow {
            return Ok(frames.boxed());
        }

        let exit = self.exit.subscribe();
        let until_exit = stream::once(exit_code(exit)).filter_map(|_| future::ready(None));
        Ok(frames.chain(until_exit).boxed())
    }
}

/// Observer recording `(job_id, phase, persisted)` for each announcement
#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<(i64, Phase, bool)>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<Phase> {
        self.seen.lock().unwrap().iter().map(|(_, phase, _)| *phase).collect()
    }

    /// Whether every announced job had already been persisted
    pub fn all_persisted(&self) -> bool {
        self.seen.lock().unwrap().iter().all(|(_, _, persisted)| *persisted)
    }
}

#[async_trait]
impl LifecycleObserver for RecordingObserver {
    async fn observe(&self, job: &Job, phase: Phase) {
        self.seen
            .lock()
            .unwrap()
            .push((job.job_id, phase, job.id.is_some()));
    }
}

/// Diff source answering every comparison with a fixed result
pub struct FakeDiffSource {
    result: Result<Diff, String>,
    compared: Mutex<Vec<(String, String)>>,
}

impl FakeDiffSource {
    pub fn returning(diff: Diff) -> Self {
        Self {
            result: Ok(diff),
            compared: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            compared: Mutex::new(Vec::new()),
        }
    }

    /// `(base_sha, head_sha)` of every comparison made
    pub fn compared(&self) -> Vec<(String, String)> {
        self.compared.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiffSource for FakeDiffSource {
    async fn compare(
        &self,
        _owner: &str,
        _name: &str,
        base_sha: &str,
        head_sha: &str,
    ) -> Result<Diff, DiffError> {
        self.compared
            .lock()
            .unwrap()
            .push((base_sha.to_string(), head_sha.to_string()));
        self.result.clone().map_err(DiffError)
    }
}

/// Job store that can be told to fail writes of finished records
pub struct FaultyStore {
    inner: Arc<MemoryJobStore>,
    terminal_failures: Mutex<usize>,
    terminal_writes: Mutex<usize>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            terminal_failures: Mutex::new(0),
            terminal_writes: Mutex::new(0),
        }
    }

    /// Fails the next `count` writes of terminal records
    pub fn fail_terminal_writes(&self, count: usize) {
        *self.terminal_failures.lock().unwrap() = count;
    }

    /// Attempted writes of terminal records, failed ones included
    pub fn terminal_writes(&self) -> usize {
        *self.terminal_writes.lock().unwrap()
    }
}

#[async_trait]
impl JobStore for FaultyStore {
    async fn upsert(&self, job: &Job) -> Result<Uuid, StoreError> {
        if job.is_terminal() {
            *self.terminal_writes.lock().unwrap() += 1;

            let mut failures = self.terminal_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::Backend("connection reset by peer".into()));
            }
        }
        self.inner.upsert(job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, page: Page) -> Result<Vec<Job>, StoreError> {
        self.inner.list(page).await
    }

    async fn last_successful(&self, owner: &str, name: &str) -> Result<Option<Job>, StoreError> {
        self.inner.last_successful(owner, name).await
    }
}

/// Engine wired to fakes
///
/// The coordinator writes through `faults`, which passes everything on to
/// `store` unless told otherwise.
pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub store: Arc<MemoryJobStore>,
    pub faults: Arc<FaultyStore>,
    pub observer: Arc<RecordingObserver>,
    pub executor: Arc<SandboxExecutionService>,
    pub coordinator: Coordinator,
    pub logs: LogMultiplexer,
}

impl Harness {
    pub fn new(provider: FakeProvider) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryJobStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let observer = Arc::new(RecordingObserver::default());

        let executor = Arc::new(SandboxExecutionService::new(
            provider.clone(),
            ExecutorConfig {
                image: "deployer/test".to_string(),
                ssh_key_path: PathBuf::from("/etc/deployer/id_rsa"),
                pull_image: true,
            },
        ));

        let coordinator = Coordinator::new(faults.clone(), executor.clone(), observer.clone());
        let logs = LogMultiplexer::new(store.clone(), provider.clone());

        Self {
            provider,
            store,
            faults,
            observer,
            executor,
            coordinator,
            logs,
        }
    }

    /// Stores a finished successful deploy of `acme/api` at `sha`
    pub async fn seed_success(&self, job_id: i64, sha: &str) -> Uuid {
        let mut req = request(job_id);
        req.sha = sha.to_string();
        let mut job = Job::pending(req, Utc::now());
        job.finish(Some(0), Vec::new(), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Success);
        self.store.upsert(&job).await.unwrap()
    }

    /// Id of the only job in the store
    pub async fn only_job_id(&self) -> Uuid {
        let jobs = self.store.list(Page::default()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        jobs[0].id.unwrap()
    }
}
