//! List/watch loop keeping a [`Store`] current.
//!
//! The informer lists the matching objects, replaces the mirror with that
//! snapshot, then watches from the list's resource version. A watch that ends
//! or fails is re-established from the last resource version seen; a watch
//! that is too old triggers a fresh list. Every change to the mirror is reported
//! to the [`ResourceEventHandler`] after the mirror is updated.

use crate::error::InformerError;
use crate::handler::{DeletedFinalStateUnknown, DeletedObject, ResourceEventHandler};
use crate::key::meta_namespace_key;
use crate::store::Store;
use futures::StreamExt;
use kube::Resource;
use parking_lot::Mutex;
use rand::Rng;
use resource_client::{ListFilter, ResourceClient, WatchEvent};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use workqueue::ExponentialBackoff;

/// What a periodic resync does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResyncPolicy {
    /// Replay every mirrored object as an update, and report every surviving
    /// object as updated after a relist
    #[default]
    ReplayAll,
    /// List again and report only objects whose resource version changed
    ChangedOnly,
}

/// Informer settings
#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Objects to mirror
    pub filter: ListFilter,
    /// Interval between resyncs; zero disables resync
    pub resync_period: Duration,
    /// What a resync does
    pub resync_policy: ResyncPolicy,
    /// First delay after a failed list or watch
    pub min_backoff: Duration,
    /// Upper bound on the retry delay
    pub max_backoff: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            filter: ListFilter::default(),
            resync_period: Duration::ZERO,
            resync_policy: ResyncPolicy::default(),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl InformerConfig {
    /// Mirror objects matching `filter`, without resync.
    #[must_use]
    pub fn new(filter: ListFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Enable periodic resync.
    #[must_use]
    pub fn with_resync(mut self, period: Duration, policy: ResyncPolicy) -> Self {
        self.resync_period = period;
        self.resync_policy = policy;
        self
    }
}

/// Keeps a local mirror of one resource kind and reports its changes.
///
/// Share it behind an [`Arc`]: one task drives [`Informer::run`] while others
/// wait for the initial sync and read the [`Store`].
pub struct Informer<K, C> {
    kind: String,
    client: C,
    config: InformerConfig,
    handler: Box<dyn ResourceEventHandler<K>>,
    store: Store<K>,
    synced: watch::Sender<bool>,
    started: AtomicBool,
    last_sync_resource_version: Mutex<String>,
}

impl<K, C> fmt::Debug for Informer<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("store", &self.store)
            .field("synced", &*self.synced.borrow())
            .finish_non_exhaustive()
    }
}

impl<K, C> Informer<K, C>
where
    K: Resource + Send + Sync + 'static,
    K::DynamicType: Default,
    C: ResourceClient<K>,
{
    /// Create an informer. Nothing happens until [`Informer::run`] is called.
    pub fn new(
        client: C,
        config: InformerConfig,
        handler: impl ResourceEventHandler<K> + 'static,
    ) -> Self {
        Self {
            kind: K::kind(&K::DynamicType::default()).into_owned(),
            client,
            config,
            handler: Box::new(handler),
            store: Store::default(),
            synced: watch::Sender::new(false),
            started: AtomicBool::new(false),
            last_sync_resource_version: Mutex::new(String::new()),
        }
    }

    /// Shared read-only view of the mirror.
    #[must_use]
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Returns `true` once the first list has been applied to the mirror.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resource version of the most recent list.
    #[must_use]
    pub fn last_sync_resource_version(&self) -> String {
        self.last_sync_resource_version.lock().clone()
    }

    /// Waits until the mirror has synced, or `token` is cancelled.
    ///
    /// Returns `true` if the mirror synced.
    pub async fn wait_for_initial_sync(&self, token: &CancellationToken) -> bool {
        let mut synced = self.synced.subscribe();
        tokio::select! {
            biased;
            synced = async { synced.wait_for(|synced| *synced).await.is_ok() } => synced,
            () = token.cancelled() => false,
        }
    }

    /// Mirror the remote state until `token` is cancelled.
    ///
    /// List and watch failures are retried with backoff; this only returns
    /// once cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`InformerError::AlreadyStarted`] on a second call, and
    /// [`InformerError::InvalidFilter`] if the filter's selectors do not parse.
    pub async fn run(&self, token: CancellationToken) -> Result<(), InformerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(InformerError::AlreadyStarted);
        }
        self.config.filter.validate()?;

        info!(
            "Starting {} informer (namespace: {}, fields: {}, labels: {})",
            self.kind,
            self.config.filter.namespace.as_deref().unwrap_or("<all>"),
            self.config.filter.fields().unwrap_or("<none>"),
            self.config.filter.labels().unwrap_or("<none>"),
        );

        tokio::select! {
            () = token.cancelled() => {}
            () = self.list_and_watch() => {}
        }

        info!("{} informer stopped", self.kind);
        Ok(())
    }

    async fn list_and_watch(&self) {
        let filter = &self.config.filter;
        let mut backoff = ExponentialBackoff::new(self.config.min_backoff, self.config.max_backoff);
        let mut resync = self.resync_interval();

        'list: loop {
            let list = match self.client.list(filter).await {
                Ok(list) => list,
                Err(e) => {
                    let delay = jittered(backoff.next_backoff());
                    error!("Failed to list {}: {}, retrying in {:?}", self.kind, e, delay);
                    tokio::time::sleep(delay).await;
                    continue 'list;
                }
            };

            let mut resource_version = list.resource_version;
            debug!(
                "Listed {} {} objects at resource version {}",
                list.items.len(),
                self.kind,
                resource_version
            );
            self.apply_snapshot(list.items);
            *self.last_sync_resource_version.lock() = resource_version.clone();
            if !self.has_synced() {
                info!("{} mirror synced with {} objects", self.kind, self.store.len());
                self.synced.send_replace(true);
            }
            backoff.reset();

            loop {
                let mut stream = match self.client.watch(filter, &resource_version).await {
                    Ok(stream) => stream,
                    Err(e) if e.is_expired() => {
                        info!("{} watch expired ({}), relisting", self.kind, e);
                        continue 'list;
                    }
                    Err(e) => {
                        let delay = jittered(backoff.next_backoff());
                        warn!("Failed to watch {}: {}, retrying in {:?}", self.kind, e, delay);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };
                debug!("Watching {} from resource version {}", self.kind, resource_version);

                loop {
                    let next = tokio::select! {
                        next = stream.next() => next,
                        () = tick(&mut resync) => match self.config.resync_policy {
                            ResyncPolicy::ReplayAll => {
                                self.replay_store();
                                continue;
                            }
                            ResyncPolicy::ChangedOnly => {
                                debug!("Resyncing {} by relisting", self.kind);
                                continue 'list;
                            }
                        },
                    };

                    match next {
                        Some(Ok(event)) => {
                            backoff.reset();
                            if let Some(version) = self.apply_watch_event(event) {
                                resource_version = version;
                            }
                        }
                        Some(Err(e)) if e.is_expired() => {
                            info!("{} watch expired ({}), relisting", self.kind, e);
                            continue 'list;
                        }
                        Some(Err(e)) => {
                            let delay = jittered(backoff.next_backoff());
                            warn!(
                                "{} watch failed: {}, re-watching from {} in {:?}",
                                self.kind, e, resource_version, delay
                            );
                            tokio::time::sleep(delay).await;
                            break;
                        }
                        None => {
                            debug!(
                                "{} watch closed, re-watching from {}",
                                self.kind, resource_version
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    fn resync_interval(&self) -> Option<Interval> {
        let period = self.config.resync_period;
        if period.is_zero() {
            return None;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }

    /// Replaces the mirror with a full list and reports the differences.
    fn apply_snapshot(&self, items: Vec<K>) {
        let mut keyed = Vec::with_capacity(items.len());
        for object in items {
            match meta_namespace_key(&object) {
                Ok(key) => keyed.push((key, Arc::new(object))),
                Err(e) => warn!("Dropping listed {} without a key: {}", self.kind, e),
            }
        }

        let replaced = self.store.replace(keyed);
        for object in &replaced.added {
            self.handler.on_add(object);
        }
        for (old, new) in &replaced.updated {
            if self.should_report_update(old, new) {
                self.handler.on_update(old, new);
            }
        }
        for (key, last_known) in replaced.removed {
            debug!("{} {} disappeared while not watching", self.kind, key);
            self.handler
                .on_delete(&DeletedObject::Tombstone(DeletedFinalStateUnknown {
                    key,
                    obj: last_known,
                }));
        }
    }

    fn should_report_update(&self, old: &K, new: &K) -> bool {
        match self.config.resync_policy {
            ResyncPolicy::ReplayAll => true,
            ResyncPolicy::ChangedOnly => {
                let old_version = old.meta().resource_version.as_deref();
                let new_version = new.meta().resource_version.as_deref();
                old_version.is_none() || old_version != new_version
            }
        }
    }

    /// Applies one watch event and returns the resource version it carries.
    fn apply_watch_event(&self, event: WatchEvent<K>) -> Option<String> {
        debug!("{} watch event {}", self.kind, event.kind());
        match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                let version = object.meta().resource_version.clone();
                let object = Arc::new(object);
                match meta_namespace_key(object.as_ref()) {
                    Ok(key) => match self.store.insert(key, Arc::clone(&object)) {
                        Some(old) => self.handler.on_update(&old, &object),
                        None => self.handler.on_add(&object),
                    },
                    Err(e) => warn!("Dropping watched {} without a key: {}", self.kind, e),
                }
                version
            }
            WatchEvent::Deleted(object) => {
                let version = object.meta().resource_version.clone();
                match meta_namespace_key(&object) {
                    Ok(key) => {
                        self.store.remove(&key);
                        self.handler.on_delete(&DeletedObject::Live(Arc::new(object)));
                    }
                    Err(e) => warn!("Dropping deleted {} without a key: {}", self.kind, e),
                }
                version
            }
            WatchEvent::Bookmark(version) => Some(version),
        }
    }

    fn replay_store(&self) {
        let objects = self.store.list();
        debug!("Resync replaying {} {} objects", objects.len(), self.kind);
        for object in &objects {
            self.handler.on_update(object, object);
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Adds up to 10% random jitter so reconnecting clients spread out.
fn jittered(delay: Duration) -> Duration {
    let max_jitter = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
    if max_jitter == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}
