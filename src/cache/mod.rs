// src/cache/mod.rs

pub mod store;

use anyhow::{Context, Result};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::loader::DatasetLoader;
use crate::snapshot::{Snapshot, SnapshotData};
use store::BlobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing loaded yet.
    Empty,
    /// A refresh is running.
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was swapped in.
    Completed,
    /// The pipeline failed; the previous snapshot (if any) is kept.
    Failed,
    /// Another refresh was in flight; nothing was done.
    AlreadyRunning,
}

/// Owns the current [`Snapshot`] and decides when to rebuild it.
///
/// Readers get an `Arc<Snapshot>` and never wait on a refresh once a
/// snapshot exists. At most one refresh runs at a time.
pub struct Orchestrator {
    loader: DatasetLoader,
    store: Arc<dyn BlobStore>,
    max_age: Duration,
    current: RwLock<Option<Arc<Snapshot>>>,
    refreshing: AtomicBool,
    refreshed: Notify,
}

/// Clears the in-flight flag and wakes cold-start waiters, even if the refresh unwinds.
struct InFlight<'a>(&'a Orchestrator);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.refreshing.store(false, Ordering::Release);
        self.0.refreshed.notify_waiters();
    }
}

impl Orchestrator {
    pub fn new(loader: DatasetLoader, store: Arc<dyn BlobStore>, max_age: Duration) -> Arc<Self> {
        Arc::new(Self {
            loader,
            store,
            max_age,
            current: RwLock::new(None),
            refreshing: AtomicBool::new(false),
            refreshed: Notify::new(),
        })
    }

    pub fn state(&self) -> CacheState {
        if self.refreshing.load(Ordering::Acquire) {
            CacheState::Loading
        } else if self.current().is_some() {
            CacheState::Ready
        } else {
            CacheState::Empty
        }
    }

    /// The snapshot in memory right now, without loading anything.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap(&self, snapshot: Arc<Snapshot>) {
        match self.current.write() {
            Ok(mut guard) => *guard = Some(snapshot),
            Err(poisoned) => *poisoned.into_inner() = Some(snapshot),
        }
    }

    fn is_stale(&self, snapshot: &Snapshot) -> bool {
        snapshot
            .age()
            .to_std()
            .map_or(false, |age| age > self.max_age)
    }

    /// Current snapshot, loading it first if nothing is in memory.
    ///
    /// Cold: try the store, then run the pipeline and wait for it. Stale:
    /// start a background refresh and return the stale snapshot. `None` only
    /// when no pipeline run has ever succeeded.
    pub async fn get(self: &Arc<Self>) -> Option<Arc<Snapshot>> {
        if self.current().is_none() && !self.load_persisted().await && self.current().is_none()
        {
            info!("snapshot not in memory or store, loading from sources");
            self.refresh_or_wait().await;
        }

        let snapshot = self.current()?;
        if self.is_stale(&snapshot) && !self.refreshing.load(Ordering::Acquire) {
            info!(timestamp = %snapshot.timestamp, "snapshot past max age, refreshing in background");
            let me = Arc::clone(self);
            tokio::spawn(async move {
                me.refresh().await;
            });
        }
        Some(snapshot)
    }

    /// Data of [`Orchestrator::get`], or the empty-shaped dataset.
    pub async fn get_current_snapshot_data(self: &Arc<Self>) -> SnapshotData {
        self.get()
            .await
            .map(|s| s.data.clone())
            .unwrap_or_default()
    }

    async fn refresh_or_wait(&self) {
        let done = self.refreshed.notified();
        if self.refresh().await == RefreshOutcome::AlreadyRunning {
            debug!("waiting on in-flight refresh");
            done.await;
        }
    }

    /// Rebuild the snapshot from the sources. A call made while another
    /// refresh runs returns [`RefreshOutcome::AlreadyRunning`] immediately.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh already in flight");
            return RefreshOutcome::AlreadyRunning;
        }
        let _in_flight = InFlight(self);

        match self.loader.load().await {
            Ok(data) => {
                let snapshot = Arc::new(Snapshot::new(data));
                self.swap(Arc::clone(&snapshot));
                info!(timestamp = %snapshot.timestamp, "snapshot refreshed");
                if let Err(e) = self.persist(snapshot).await {
                    error!("failed to persist snapshot: {:#}", e);
                }
                RefreshOutcome::Completed
            }
            Err(e) => {
                error!("refresh failed, keeping previous snapshot: {:#}", e);
                RefreshOutcome::Failed
            }
        }
    }

    async fn persist(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let bytes = serde_json::to_vec(&*snapshot).context("serializing snapshot")?;
            store.write(&bytes)
        })
        .await
        .context("persist task failed")?
    }

    /// Populate memory from the store. Missing, unreadable or corrupt data is a miss.
    async fn load_persisted(&self) -> bool {
        let store = Arc::clone(&self.store);
        let read = tokio::task::spawn_blocking(move || -> Result<Option<Snapshot>> {
            match store.read()? {
                Some(bytes) => Ok(Some(
                    serde_json::from_slice(&bytes).context("decoding stored snapshot")?,
                )),
                None => Ok(None),
            }
        })
        .await
        .context("store read task failed")
        .and_then(|r| r);

        match read {
            Ok(Some(snapshot)) => {
                info!(timestamp = %snapshot.timestamp, "loaded snapshot from store");
                // a refresh may have finished while we were reading
                if self.current().is_none() {
                    self.swap(Arc::new(snapshot));
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("stored snapshot unusable, treating as miss: {:#}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::store::MemoryStore;
    use super::*;
    use crate::config::{EntitiesConfig, SourcesConfig};
    use crate::fetch::sources::SourceUrls;
    use crate::fetch::Fetcher;
    use crate::snapshot::EntitySeries;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    const SOURCES_PER_LOAD: usize = 9;

    /// Serves a tiny national case file and counts calls. When gated, every
    /// fetch waits for a permit on `gate`.
    struct FakeFetcher {
        calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeFetcher {
        fn open() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for FakeFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, String> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.gate {
                    let _permit = gate.acquire().await;
                }
                if url.ends_with("master/us.csv") {
                    "date,cases,deaths\n2021-01-01,1,0\n2021-01-02,2,0\n".to_string()
                } else {
                    String::new()
                }
            })
        }
    }

    struct FailingStore;

    impl BlobStore for FailingStore {
        fn read(&self) -> Result<Option<Vec<u8>>> {
            anyhow::bail!("disk unavailable")
        }
        fn write(&self, _bytes: &[u8]) -> Result<()> {
            anyhow::bail!("disk unavailable")
        }
    }

    fn orchestrator(fetcher: Arc<FakeFetcher>, store: Arc<dyn BlobStore>) -> Arc<Orchestrator> {
        let urls = SourceUrls::from_config(&SourcesConfig::default()).unwrap();
        let loader = DatasetLoader::new(fetcher, urls, EntitiesConfig::default());
        Orchestrator::new(loader, store, Duration::from_secs(24 * 60 * 60))
    }

    fn old_snapshot_json() -> Vec<u8> {
        let snapshot = Snapshot {
            timestamp: chrono::Utc::now() - chrono::Duration::hours(48),
            data: SnapshotData {
                country_data: vec![EntitySeries {
                    key: Default::default(),
                    rows: Vec::new(),
                }],
                ..Default::default()
            },
        };
        serde_json::to_vec(&snapshot).unwrap()
    }

    async fn wait_for_ready(orch: &Orchestrator) {
        for _ in 0..1000 {
            if orch.state() == CacheState::Ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("orchestrator never became ready");
    }

    #[tokio::test]
    async fn cold_get_runs_pipeline_and_persists() {
        let fetcher = FakeFetcher::open();
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(fetcher.clone(), store.clone());
        assert_eq!(orch.state(), CacheState::Empty);

        let snapshot = orch.get().await.expect("snapshot after cold load");
        assert_eq!(fetcher.calls(), SOURCES_PER_LOAD);
        assert_eq!(orch.state(), CacheState::Ready);
        // national file has two days; population inference consumes the last
        assert_eq!(snapshot.data.country_data[0].rows.len(), 1);

        let stored: Snapshot = serde_json::from_slice(&store.read().unwrap().unwrap()).unwrap();
        assert_eq!(stored, *snapshot);

        // warm: served from memory, no new fetches
        orch.get().await.unwrap();
        assert_eq!(fetcher.calls(), SOURCES_PER_LOAD);
    }

    #[tokio::test]
    async fn fresh_store_avoids_network() {
        let first = orchestrator(FakeFetcher::open(), Arc::new(MemoryStore::default()));
        let snapshot = first.get().await.unwrap();
        let bytes = serde_json::to_vec(&*snapshot).unwrap();

        let fetcher = FakeFetcher::open();
        let orch = orchestrator(fetcher.clone(), Arc::new(MemoryStore::with_contents(bytes)));
        let loaded = orch.get().await.unwrap();
        assert_eq!(*loaded, *snapshot);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn corrupt_store_is_a_miss() {
        let fetcher = FakeFetcher::open();
        let orch = orchestrator(
            fetcher.clone(),
            Arc::new(MemoryStore::with_contents("{not json")),
        );
        assert!(orch.get().await.is_some());
        assert_eq!(fetcher.calls(), SOURCES_PER_LOAD);
    }

    #[tokio::test]
    async fn persistence_failure_does_not_fail_refresh() {
        let orch = orchestrator(FakeFetcher::open(), Arc::new(FailingStore));
        assert_eq!(orch.refresh().await, RefreshOutcome::Completed);
        let data = orch.get_current_snapshot_data().await;
        assert_eq!(data.country_data.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_run_once() {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = FakeFetcher::gated(gate.clone());
        let orch = orchestrator(fetcher.clone(), Arc::new(MemoryStore::default()));

        let (first, second, _) = tokio::join!(orch.refresh(), orch.refresh(), async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        });

        let mut outcomes = [first, second];
        outcomes.sort_by_key(|o| *o == RefreshOutcome::AlreadyRunning);
        assert_eq!(
            outcomes,
            [RefreshOutcome::Completed, RefreshOutcome::AlreadyRunning]
        );
        assert_eq!(fetcher.calls(), SOURCES_PER_LOAD);
        assert_eq!(orch.state(), CacheState::Ready);
    }

    #[tokio::test]
    async fn concurrent_cold_gets_share_one_load() {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = FakeFetcher::gated(gate.clone());
        let orch = orchestrator(fetcher.clone(), Arc::new(MemoryStore::default()));

        let (a, b, _) = tokio::join!(orch.get(), orch.get(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.add_permits(1);
        });

        assert!(a.is_some() && b.is_some());
        assert_eq!(fetcher.calls(), SOURCES_PER_LOAD);
    }

    #[tokio::test]
    async fn stale_snapshot_is_served_while_refreshing() {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = FakeFetcher::gated(gate.clone());
        let store = Arc::new(MemoryStore::with_contents(old_snapshot_json()));
        let orch = orchestrator(fetcher.clone(), store.clone());

        let served = orch.get().await.unwrap();
        assert!(served.age() > chrono::Duration::hours(47));
        assert!(served.data.country_data[0].rows.is_empty());

        // background refresh is parked on the gate; readers still get the old data
        tokio::task::yield_now().await;
        assert_eq!(orch.state(), CacheState::Loading);
        let again = orch.get().await.unwrap();
        assert!(Arc::ptr_eq(&served, &again));

        gate.add_permits(1);
        wait_for_ready(&orch).await;
        let fresh = orch.current().unwrap();
        assert!(fresh.timestamp > served.timestamp);
        assert_eq!(fresh.data.country_data[0].rows.len(), 1);
        assert_eq!(fetcher.calls(), SOURCES_PER_LOAD);
    }

    #[tokio::test]
    async fn failed_sources_still_yield_empty_shaped_data() {
        struct Empty;
        impl Fetcher for Empty {
            fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, String> {
                Box::pin(async { String::new() })
            }
        }
        let urls = SourceUrls::from_config(&SourcesConfig::default()).unwrap();
        let loader = DatasetLoader::new(Arc::new(Empty), urls, EntitiesConfig::default());
        let orch = Orchestrator::new(
            loader,
            Arc::new(MemoryStore::default()),
            Duration::from_secs(60),
        );
        let data = orch.get_current_snapshot_data().await;
        assert!(data.is_empty());
        assert_eq!(orch.state(), CacheState::Ready);
    }
}
