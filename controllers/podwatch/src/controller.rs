//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the local pod
//! mirror, the change detector, the work queue and the queue workers together,
//! and owns the process-wide stop signal.

use crate::config::Config;
use crate::error::ControllerError;
use crate::handlers::ChangeDetector;
use crate::probes::{self, ProbeState};
use crate::queue::EventQueue;
use crate::worker::{EventCounter, EventCounts, Reconcile, run_worker};
use informer::{Informer, Store};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use parking_lot::Mutex;
use prometheus::Registry;
use resource_client::{KubeResourceClient, ResourceClient};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use workqueue::QueueMetrics;

const QUEUE_NAME: &str = "podwatch";

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for the pod watcher.
pub struct Controller<C> {
    config: Config,
    informer: Arc<Informer<Pod, C>>,
    queue: EventQueue,
    counter: Arc<EventCounter>,
    registry: Registry,
    token: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    tasks: Mutex<Vec<Task>>,
}

impl<C> fmt::Debug for Controller<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl Controller<KubeResourceClient<Pod>> {
    /// Creates a controller talking to the cluster from the in-cluster or kubeconfig environment.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing podwatch controller");
        let client = Client::try_default().await.map_err(|e| {
            error!("Failed to create Kubernetes client: {}", e);
            ControllerError::Kube(e)
        })?;
        Self::with_client(config, KubeResourceClient::new(client))
    }
}

impl<C> Controller<C>
where
    C: ResourceClient<Pod> + 'static,
{
    /// Creates a controller on top of an existing list/watch client.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_client(config: Config, client: C) -> Result<Self, ControllerError> {
        config.validate()?;

        let registry = Registry::new();
        let metrics = QueueMetrics::new(QUEUE_NAME, &registry)?;
        let queue = EventQueue::with_metrics(metrics);
        let detector = ChangeDetector::new(queue.clone());
        let informer = Arc::new(Informer::new(client, config.informer_config(), detector));

        Ok(Self {
            config,
            informer,
            queue,
            counter: Arc::new(EventCounter::default()),
            registry,
            token: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the mirror, waits for its initial sync, then starts the workers.
    ///
    /// Returns whether the mirror synced. A sync that is aborted by `stop` or
    /// exceeds the configured timeout is logged, not treated as an error; the
    /// mirror keeps retrying in the background.
    ///
    /// # Errors
    ///
    /// Fails on a second call, or if the probe server cannot bind its address.
    /// Nothing is started in either case.
    pub async fn start(&self) -> Result<bool, ControllerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(informer::InformerError::AlreadyStarted.into());
        }
        info!("Starting the podwatch controller");

        let listener = match self.config.metrics_addr {
            Some(addr) => Some(probes::bind(addr).await?),
            None => None,
        };

        self.spawn({
            let informer = Arc::clone(&self.informer);
            let token = self.token.clone();
            async move { informer.run(token).await.map_err(ControllerError::from) }
        });

        if let Some(listener) = listener {
            let informer = Arc::clone(&self.informer);
            let state = ProbeState::new(self.registry.clone(), move || informer.has_synced());
            self.spawn(probes::serve(listener, state, self.token.clone()));
        }

        let synced = self.wait_for_sync().await;
        if synced {
            info!("Caches synced with {} pods", self.informer.store().len());
        } else {
            error!("timed out waiting for caches to sync");
        }

        let counter = Arc::clone(&self.counter);
        let reconciler: Arc<dyn Reconcile> = counter;
        for id in 0..self.config.workers {
            let queue = self.queue.clone();
            let reconciler = Arc::clone(&reconciler);
            self.spawn(async move {
                run_worker(id, queue, reconciler).await;
                Ok(())
            });
        }

        Ok(synced)
    }

    async fn wait_for_sync(&self) -> bool {
        let sync = self.informer.wait_for_initial_sync(&self.token);
        match self.config.sync_timeout {
            Some(timeout) => tokio::time::timeout(timeout, sync).await.unwrap_or(false),
            None => sync.await,
        }
    }

    /// Starts the controller and runs it until `shutdown` resolves, then stops and drains it.
    ///
    /// `shutdown` is polled before startup begins, so it also aborts a sync
    /// that never completes.
    ///
    /// # Errors
    ///
    /// Returns a startup failure, or the first error of a background task.
    pub async fn run_until(
        &self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ControllerError> {
        tokio::pin!(shutdown);

        let started = tokio::select! {
            biased;
            () = &mut shutdown => None,
            result = self.start() => Some(result),
        };
        match started {
            Some(Ok(_)) => (&mut shutdown).await,
            Some(Err(e)) => {
                error!("Failed to start controller: {}", e);
                self.stop();
                if let Err(wait_error) = self.wait().await {
                    error!("Error while stopping controller: {}", wait_error);
                }
                return Err(e);
            }
            None => info!("Shutdown requested before the controller finished starting"),
        }

        self.stop();
        self.wait().await
    }

    /// Signals shutdown. Safe to call any number of times.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            info!("Controller already stopped");
            return;
        }
        info!("Stopping the podwatch controller");
        self.token.cancel();
        self.queue.shut_down();
    }

    /// Waits for in-flight events and background tasks to finish after [`Controller::stop`].
    ///
    /// Returns the first error reported by a background task.
    pub async fn wait(&self) -> Result<(), ControllerError> {
        if !self.stopped.load(Ordering::SeqCst) {
            warn!("Waiting on a controller that has not been stopped");
        }
        self.queue.shut_down_with_drain().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut result = Ok(());
        for task in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ControllerError::from(e)),
            };
            if let Err(e) = outcome {
                error!("Background task failed: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!("Controller stopped");
        result
    }

    /// Shared read-only view of the pod mirror.
    pub fn store(&self) -> Store<Pod> {
        self.informer.store()
    }

    /// Returns `true` once the mirror has synced.
    pub fn has_synced(&self) -> bool {
        self.informer.has_synced()
    }

    /// Events processed so far, per type.
    pub fn event_counts(&self) -> EventCounts {
        self.counter.counts()
    }

    /// Registry holding the queue metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn spawn(
        &self,
        task: impl Future<Output = Result<(), ControllerError>> + Send + 'static,
    ) {
        self.tasks.lock().push(tokio::spawn(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use resource_client::MockResourceClient;
    use std::time::Duration;

    fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn config() -> Config {
        Config {
            metrics_addr: None,
            ..Config::default()
        }
    }

    fn counts(create: u64, update: u64, delete: u64) -> EventCounts {
        EventCounts {
            create,
            update,
            delete,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_pod_produces_one_create() {
        let mock = MockResourceClient::new();
        mock.create(pod("pod", "Running")).unwrap();

        let controller = Controller::with_client(config(), mock).unwrap();
        assert!(controller.start().await.unwrap());
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(controller.event_counts(), counts(1, 0, 0));
        assert_eq!(controller.store().list_keys(), vec!["default/pod"]);

        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_lifecycle_is_counted() {
        let mock = MockResourceClient::new();
        let controller = Controller::with_client(config(), mock.clone()).unwrap();
        assert!(controller.start().await.unwrap());

        let web = mock.create(pod("web", "Running")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        mock.update(web).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        mock.delete("default/web").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(controller.event_counts(), counts(1, 1, 1));
        assert!(controller.store().is_empty());

        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pods_outside_filter_are_ignored() {
        let mock = MockResourceClient::new();
        mock.create(pod("pending", "Pending")).unwrap();
        let controller = Controller::with_client(config(), mock.clone()).unwrap();
        assert!(controller.start().await.unwrap());

        mock.create(pod("done", "Succeeded")).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(controller.event_counts(), counts(0, 0, 0));
        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let controller = Controller::with_client(config(), MockResourceClient::new()).unwrap();
        assert!(controller.start().await.unwrap());

        controller.stop();
        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_timeout_is_soft() {
        let mock = MockResourceClient::<Pod>::new();
        mock.fail_next_lists(usize::MAX);
        let config = Config {
            sync_timeout: Some(Duration::from_secs(5)),
            ..config()
        };

        let controller = Controller::with_client(config, mock).unwrap();
        assert!(!controller.start().await.unwrap());
        assert!(!controller.has_synced());

        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_sync_wait() {
        let mock = MockResourceClient::<Pod>::new();
        mock.fail_next_lists(usize::MAX);
        let controller = Arc::new(Controller::with_client(config(), mock).unwrap());

        let starting = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.start().await }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        controller.stop();

        assert!(!starting.await.unwrap().unwrap());
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let controller = Controller::with_client(config(), MockResourceClient::new()).unwrap();
        assert!(controller.start().await.unwrap());
        assert!(controller.start().await.is_err());

        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_occupied_metrics_addr_fails_start() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            metrics_addr: Some(taken.local_addr().unwrap()),
            ..config()
        };
        let mock = MockResourceClient::<Pod>::new();
        let controller = Controller::with_client(config, mock.clone()).unwrap();

        assert!(matches!(controller.start().await, Err(ControllerError::Io(_))));
        assert_eq!(mock.list_calls(), 0);

        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_server_runs_until_stopped() {
        let config = Config {
            metrics_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..config()
        };
        let controller = Controller::with_client(config, MockResourceClient::new()).unwrap();
        assert!(controller.start().await.unwrap());

        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_workers_count_mixed_lifecycle_once_per_change() {
        let mock = MockResourceClient::new();
        let config = Config {
            workers: 2,
            ..config()
        };
        let controller = Controller::with_client(config, mock.clone()).unwrap();
        assert!(controller.start().await.unwrap());

        let web = mock.create(pod("web", "Running")).unwrap();
        let api = mock.create(pod("api", "Running")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        mock.update(web).unwrap();
        mock.update(api).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        mock.delete("default/web").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(controller.event_counts(), counts(2, 2, 1));
        assert_eq!(controller.store().list_keys(), vec!["default/api"]);

        controller.stop();
        controller.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_endless_sync_stops_cleanly() {
        let mock = MockResourceClient::<Pod>::new();
        mock.fail_next_lists(usize::MAX);
        let controller = Controller::with_client(config(), mock).unwrap();

        controller
            .run_until(tokio::time::sleep(Duration::from_secs(10)))
            .await
            .unwrap();

        assert!(!controller.has_synced());
        assert!(controller.stopped.load(Ordering::SeqCst));
        assert!(controller.queue.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_processes_events_before_shutdown() {
        let mock = MockResourceClient::new();
        mock.create(pod("web", "Running")).unwrap();
        let controller = Controller::with_client(config(), mock).unwrap();

        controller
            .run_until(tokio::time::sleep(Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(controller.event_counts(), counts(1, 0, 0));
    }

    #[tokio::test]
    async fn test_run_until_reports_startup_failure() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            metrics_addr: Some(taken.local_addr().unwrap()),
            ..config()
        };
        let controller = Controller::with_client(config, MockResourceClient::new()).unwrap();

        let result = controller.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(ControllerError::Io(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = Config {
            workers: 0,
            ..config()
        };
        let result = Controller::with_client(config, MockResourceClient::new());
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    /// Mirrors the one-existing-pod scenario against a real cluster.
    #[tokio::test]
    #[ignore] // Requires a running cluster
    async fn test_live_cluster_one_existing_pod() {
        use k8s_openapi::api::core::v1::{Container, Namespace, PodSpec};
        use kube::Api;
        use kube::api::{DeleteParams, PostParams};

        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = Client::try_default().await.expect("Failed to create client");

        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let ns_name = format!("store-test-{suffix}");
        let namespaces: Api<Namespace> = Api::all(client.clone());
        namespaces
            .create(
                &PostParams::default(),
                &Namespace {
                    metadata: ObjectMeta {
                        name: Some(ns_name.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .expect("Failed to create namespace");

        let pods: Api<Pod> = Api::namespaced(client.clone(), &ns_name);
        pods.create(
            &PostParams::default(),
            &Pod {
                metadata: ObjectMeta {
                    name: Some("pod".to_string()),
                    ..Default::default()
                },
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "busybox".to_string(),
                        image: Some("gcr.io/google_containers/echoserver:1.4".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create pod");

        // The default filter only matches running pods
        for _ in 0..120 {
            let phase = pods
                .get("pod")
                .await
                .ok()
                .and_then(|pod| pod.status)
                .and_then(|status| status.phase);
            if phase.as_deref() == Some("Running") {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let config = Config {
            namespace: Some(ns_name.clone()),
            ..config()
        };
        let controller = Controller::with_client(config, KubeResourceClient::new(client)).unwrap();
        assert!(controller.start().await.unwrap());
        tokio::time::sleep(Duration::from_secs(3)).await;
        let observed = controller.event_counts();

        controller.stop();
        controller.wait().await.unwrap();
        namespaces
            .delete(&ns_name, &DeleteParams::default())
            .await
            .expect("Failed to delete namespace");

        assert_eq!(observed, counts(1, 0, 0));
    }
}
