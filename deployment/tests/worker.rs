//! End-to-end tests of the deployment worker pipeline

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use semver::Version;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use ember_deployment::bootstrap::BootstrapManager;
use ember_deployment::cloud::{
    CloudTransport, ComponentCandidate, PlatformAttributes, ResolveCandidatesRequest,
};
use ember_deployment::errors::DeploymentError;
use ember_deployment::executor::LifecycleExecutor;
use ember_deployment::health::{ComponentStatus, HealthService};
use ember_deployment::models::deployment::{
    ComponentApplyState, ComponentDeploymentRecord, Deployment,
};
use ember_deployment::queue::{DeploymentQueue, EnqueueOutcome};
use ember_deployment::resolver::component::ComponentVersionResolver;
use ember_deployment::resolver::dependency::DependencyResolver;
use ember_deployment::store::memory::MemoryConfigStore;
use ember_deployment::store::recipes::RecipeStore;
use ember_deployment::store::{in_progress_components_path, in_progress_document_path, ConfigStore};
use ember_deployment::workers::deployer;

struct NoHealth;

#[async_trait]
impl HealthService for NoHealth {
    async fn component_status(
        &self,
        _name: &str,
    ) -> Result<Option<ComponentStatus>, DeploymentError> {
        Ok(None)
    }
}

struct NoCloud;

#[async_trait]
impl CloudTransport for NoCloud {
    async fn list_scope_memberships(&self) -> Result<Vec<String>, DeploymentError> {
        Ok(Vec::new())
    }

    async fn resolve_component_candidates(
        &self,
        _request: &ResolveCandidatesRequest,
    ) -> Result<Vec<ComponentCandidate>, DeploymentError> {
        Ok(Vec::new())
    }
}

/// Config store that fails every write under the per-component snapshot
/// records and signals the test when it does.
struct FailingComponentWrites {
    inner: Arc<MemoryConfigStore>,
    denied: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl ConfigStore for FailingComponentWrites {
    async fn read(&self, path: &[&str]) -> Result<Value, DeploymentError> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &[&str], value: Value, depth: u8) -> Result<(), DeploymentError> {
        if path.starts_with(&in_progress_components_path()) {
            let _ = self.denied.send(());
            return Err(DeploymentError::Internal(
                "injected component record write failure".to_string(),
            ));
        }
        self.inner.write(path, value, depth).await
    }

    async fn delete(&self, path: &[&str]) -> Result<(), DeploymentError> {
        self.inner.delete(path).await
    }
}

/// Records every apply call, whether the persisted snapshot existed at that
/// moment, and signals the test through a channel.
struct RecordingExecutor {
    config: Arc<MemoryConfigStore>,
    applies: Mutex<Vec<(Deployment, BTreeMap<String, ComponentDeploymentRecord>)>>,
    snapshot_seen: Mutex<Vec<bool>>,
    fail_ids: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl LifecycleExecutor for RecordingExecutor {
    async fn apply(
        &self,
        deployment: &Deployment,
        components: &BTreeMap<String, ComponentDeploymentRecord>,
    ) -> Result<(), DeploymentError> {
        let snapshot = self.config.read(&in_progress_document_path()).await.is_ok();
        self.snapshot_seen.lock().unwrap().push(snapshot);
        self.applies
            .lock()
            .unwrap()
            .push((deployment.clone(), components.clone()));

        let fail = self.fail_ids.lock().unwrap().contains(&deployment.id);
        let _ = self.events.send(deployment.id.clone());
        if fail {
            return Err(DeploymentError::Internal("injected apply failure".to_string()));
        }
        Ok(())
    }
}

struct TestBed {
    queue: Arc<DeploymentQueue>,
    resolver: Arc<DependencyResolver>,
    bootstrap: Arc<BootstrapManager>,
    config: Arc<MemoryConfigStore>,
    recipes: Arc<RecipeStore>,
    executor: Arc<RecordingExecutor>,
    events: mpsc::UnboundedReceiver<String>,
    _dir: tempfile::TempDir,
}

fn testbed() -> TestBed {
    let config = Arc::new(MemoryConfigStore::new());
    testbed_with_store(config.clone(), config)
}

/// Builds the bed around an arbitrary store; `memory` is the backing store
/// the assertions read directly.
fn testbed_with_store(store: Arc<dyn ConfigStore>, memory: Arc<MemoryConfigStore>) -> TestBed {
    let dir = tempfile::tempdir().unwrap();
    let recipes = Arc::new(RecipeStore::new(dir.path()));
    let queue = Arc::new(DeploymentQueue::new());

    let components =
        ComponentVersionResolver::new(Arc::new(NoHealth), store.clone(), recipes.clone());
    let resolver = Arc::new(DependencyResolver::new(
        store.clone(),
        Arc::new(NoCloud),
        components,
        recipes.clone(),
        PlatformAttributes::detect(),
        Version::new(2, 1, 0),
    ));
    let bootstrap = Arc::new(BootstrapManager::new(store, recipes.clone()));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let executor = Arc::new(RecordingExecutor {
        config: memory.clone(),
        applies: Mutex::new(Vec::new()),
        snapshot_seen: Mutex::new(Vec::new()),
        fail_ids: Mutex::new(Vec::new()),
        events: events_tx,
    });

    TestBed {
        queue,
        resolver,
        bootstrap,
        config: memory,
        recipes,
        executor,
        events: events_rx,
        _dir: dir,
    }
}

fn spawn_worker(bed: &TestBed) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(deployer::run(
        bed.queue.clone(),
        bed.resolver.clone(),
        bed.bootstrap.clone(),
        bed.executor.clone(),
        Box::pin(async move {
            let _ = shutdown_rx.await;
        }),
    ));
    (shutdown_tx, handle)
}

async fn seed_recipe(bed: &TestBed, name: &str, version: &str, bootstrap: bool) {
    let lifecycle = if bootstrap {
        json!({ "bootstrap": { "script": "bootstrap.sh" } })
    } else {
        json!({ "run": { "script": "run.sh" } })
    };
    let body = json!({
        "componentName": name,
        "componentVersion": version,
        "lifecycle": lifecycle,
    })
    .to_string();
    bed.recipes
        .write_recipe(name, &Version::parse(version).unwrap(), body.as_bytes())
        .await
        .unwrap();
}

fn deployment(id: &str, component: &str, requirement: &str) -> Deployment {
    let mut roots = BTreeMap::new();
    roots.insert(component.to_string(), requirement.to_string());
    Deployment::fleet_group(Some(id.to_string()), "sensors", format!("cfg:{}", id), roots)
}

#[tokio::test]
async fn test_worker_processes_a_deployment_end_to_end() {
    let mut bed = testbed();
    seed_recipe(&bed, "App", "1.2.0", false).await;

    assert_eq!(
        bed.queue.enqueue(deployment("dep-1", "App", ">=1.0.0")),
        EnqueueOutcome::Accepted
    );

    let (shutdown, worker) = spawn_worker(&bed);
    assert_eq!(bed.events.recv().await.unwrap(), "dep-1");
    shutdown.send(()).unwrap();
    worker.await.unwrap();

    let applies = bed.executor.applies.lock().unwrap();
    assert_eq!(applies.len(), 1);
    let (applied, components) = &applies[0];
    assert_eq!(applied.id, "dep-1");
    assert_eq!(components["App"].version, Version::new(1, 2, 0));
    assert_eq!(components["App"].state, ComponentApplyState::Resolved);
    drop(applies);

    // the snapshot was persisted before the apply and cleared after it
    assert_eq!(*bed.executor.snapshot_seen.lock().unwrap(), vec![true]);
    assert!(bed
        .config
        .read(&in_progress_document_path())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(bed.queue.is_empty());
}

#[tokio::test]
async fn test_bootstrap_components_are_flagged_for_the_executor() {
    let mut bed = testbed();
    seed_recipe(&bed, "Kernel", "2.0.0", true).await;

    bed.queue.enqueue(deployment("dep-1", "Kernel", "^2.0"));

    let (shutdown, worker) = spawn_worker(&bed);
    bed.events.recv().await.unwrap();
    shutdown.send(()).unwrap();
    worker.await.unwrap();

    let applies = bed.executor.applies.lock().unwrap();
    assert_eq!(
        applies[0].1["Kernel"].state,
        ComponentApplyState::NeedsBootstrap
    );
}

#[tokio::test]
async fn test_worker_resumes_interrupted_deployment_before_the_queue() {
    let mut bed = testbed();
    seed_recipe(&bed, "App", "1.2.0", false).await;

    // an earlier run persisted this snapshot and then the device restarted
    let interrupted = deployment("dep-stale", "App", ">=1.0.0");
    let mut records = BTreeMap::new();
    records.insert(
        "App".to_string(),
        ComponentDeploymentRecord {
            version: Version::new(1, 2, 0),
            state: ComponentApplyState::Bootstrapped,
        },
    );
    bed.bootstrap.save_state(&interrupted, &records).await.unwrap();

    bed.queue.enqueue(deployment("dep-new", "App", ">=1.0.0"));

    let (shutdown, worker) = spawn_worker(&bed);
    assert_eq!(bed.events.recv().await.unwrap(), "dep-stale");
    assert_eq!(bed.events.recv().await.unwrap(), "dep-new");
    shutdown.send(()).unwrap();
    worker.await.unwrap();

    let applies = bed.executor.applies.lock().unwrap();
    assert_eq!(applies.len(), 2);
    let (resumed, resumed_components) = &applies[0];
    assert_eq!(resumed.id, "dep-stale");
    assert_eq!(
        resumed_components["App"].state,
        ComponentApplyState::Bootstrapped
    );

    // loading the snapshot consumed it, so the resumed apply ran without one
    assert!(!bed.executor.snapshot_seen.lock().unwrap()[0]);
}

#[tokio::test]
async fn test_failed_resolution_releases_the_queue() {
    let mut bed = testbed();
    seed_recipe(&bed, "Good", "1.0.0", false).await;

    bed.queue.enqueue(deployment("dep-bad", "Missing", "^1.0"));
    bed.queue.enqueue(deployment("dep-good", "Good", "^1.0"));

    let (shutdown, worker) = spawn_worker(&bed);
    // the failing deployment never reaches the executor
    assert_eq!(bed.events.recv().await.unwrap(), "dep-good");
    shutdown.send(()).unwrap();
    worker.await.unwrap();

    assert_eq!(bed.executor.applies.lock().unwrap().len(), 1);
    assert!(bed.queue.is_empty());
    // the failure happened before any snapshot was written
    assert!(bed
        .config
        .read(&in_progress_document_path())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_apply_failure_clears_the_snapshot() {
    let mut bed = testbed();
    seed_recipe(&bed, "App", "1.2.0", false).await;
    bed.executor
        .fail_ids
        .lock()
        .unwrap()
        .push("dep-1".to_string());

    bed.queue.enqueue(deployment("dep-1", "App", ">=1.0.0"));

    let (shutdown, worker) = spawn_worker(&bed);
    bed.events.recv().await.unwrap();
    shutdown.send(()).unwrap();
    worker.await.unwrap();

    // a failed deployment is terminal, not resumable
    assert!(bed
        .config
        .read(&in_progress_document_path())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(bed.queue.is_empty());
}

#[tokio::test]
async fn test_failed_save_does_not_leave_a_resumable_snapshot() {
    let (denied_tx, mut denied_rx) = mpsc::unbounded_channel();
    let memory = Arc::new(MemoryConfigStore::new());
    let store = Arc::new(FailingComponentWrites {
        inner: memory.clone(),
        denied: denied_tx,
    });
    let bed = testbed_with_store(store, memory);
    seed_recipe(&bed, "App", "1.2.0", false).await;

    bed.queue.enqueue(deployment("dep-1", "App", ">=1.0.0"));

    let (shutdown, worker) = spawn_worker(&bed);
    denied_rx.recv().await.unwrap();
    shutdown.send(()).unwrap();
    worker.await.unwrap();

    // the deployment failed before the executor saw it
    assert!(bed.executor.applies.lock().unwrap().is_empty());
    assert!(bed.queue.is_empty());

    // the half-written snapshot was cleared, so a restart has nothing to
    // resume
    assert!(bed
        .config
        .read(&in_progress_document_path())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(bed.bootstrap.load_in_progress().await.unwrap().is_none());
}
