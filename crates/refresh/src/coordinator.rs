//! Single-flight refresh coordinator.
//!
//! Readers always get whatever is cached right now. A stale read kicks off
//! a background refresh; concurrent stale reads collapse into that one
//! refresh through the `in_flight` flag. The flag is owned by the spawned
//! refresh task, so it is held until the fetch has finished and its result
//! has been applied, whoever started it and whether or not they still wait.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, TimeDelta, Utc};
use common::{Dataset, Error, Result, Snapshot};
use standings_source::DatasetSource;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheEntry};
use crate::clock::{Clock, SystemClock};
use crate::stats::{RefreshStats, StatsCounters};

/// Result of one refresh attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// A non-empty dataset replaced the cached entry.
    Updated { teams: usize, generation: u64 },
    /// The fetch returned no rows; the cached entry was left alone.
    Empty,
    /// The fetch failed; the cached entry was left alone.
    Failed(Error),
    /// Another refresh was already running.
    Skipped,
}

/// Process-wide standings cache. Cheap to clone; clones share state.
pub struct RefreshCoordinator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for RefreshCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    source: S,
    ttl: TimeDelta,
    entry: ArcSwapOption<CacheEntry>,
    in_flight: AtomicBool,
    stats: StatsCounters,
    runtime: Handle,
    clock: Arc<dyn Clock>,
}

/// Owns the `in_flight` flag for the lifetime of one refresh.
struct InFlightGuard<S> {
    inner: Arc<Inner<S>>,
}

impl<S> InFlightGuard<S> {
    fn acquire(inner: &Arc<Inner<S>>) -> Option<Self> {
        inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                inner: Arc::clone(inner),
            })
    }
}

impl<S> Drop for InFlightGuard<S> {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl<S: DatasetSource> RefreshCoordinator<S> {
    /// Build a coordinator that spawns refreshes on the current Tokio runtime.
    pub fn new(source: S, ttl: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("coordinator needs a Tokio runtime: {}", e)))?;
        Self::with_handle(source, ttl, runtime)
    }

    /// Build a coordinator that spawns refreshes on `runtime`. Readers may
    /// then call in from any thread, inside the runtime or not.
    pub fn with_handle(source: S, ttl: Duration, runtime: Handle) -> Result<Self> {
        Self::with_clock(source, ttl, runtime, Arc::new(SystemClock))
    }

    /// Like `with_handle`, reading time from `clock` for staleness checks
    /// and entry timestamps.
    pub fn with_clock(
        source: S,
        ttl: Duration,
        runtime: Handle,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| Error::Config(format!("cache TTL out of range: {:?}", ttl)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                source,
                ttl,
                entry: ArcSwapOption::empty(),
                in_flight: AtomicBool::new(false),
                stats: StatsCounters::default(),
                runtime,
                clock,
            }),
        })
    }

    /// Startup hook: begin the first fetch right away so early readers get
    /// data before anything has had a chance to go stale.
    pub fn start(&self) {
        if self.trigger_refresh() {
            info!("Initial standings refresh started");
        }
    }

    /// Current dataset, possibly empty or stale. Never waits on a fetch.
    pub fn get_data(&self) -> Dataset {
        self.entry()
            .map(|entry| entry.dataset.clone())
            .unwrap_or_default()
    }

    /// Current entry as a whole, so the dataset and timestamp are from the
    /// same fetch. Requests a background refresh when stale.
    pub fn entry(&self) -> Option<Arc<CacheEntry>> {
        let entry = self.inner.entry.load_full();
        if cache::is_stale(entry.as_deref(), self.inner.ttl, self.inner.clock.now()) {
            self.trigger_refresh();
        }
        entry
    }

    /// JSON-ready view of the cache.
    pub fn snapshot(&self) -> Snapshot {
        match self.entry() {
            Some(entry) => entry.to_snapshot(),
            None => Snapshot {
                updated_at: None,
                rankings: Dataset::empty(),
            },
        }
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.entry.load_full().map(|entry| entry.fetched_at)
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(self.inner.clock.now())
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        let entry = self.inner.entry.load_full();
        cache::is_stale(entry.as_deref(), self.inner.ttl, now)
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn ttl(&self) -> TimeDelta {
        self.inner.ttl
    }

    pub fn stats(&self) -> RefreshStats {
        self.inner.stats.snapshot()
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Start a background refresh unless one is already running. Returns
    /// whether this call started it.
    pub fn trigger_refresh(&self) -> bool {
        self.spawn_refresh().is_some()
    }

    /// Run a refresh and wait for it. Honours the same single-flight flag as
    /// background refreshes. Dropping the returned future does not cancel
    /// the refresh; it finishes and updates the cache in the background.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let Some(handle) = self.spawn_refresh() else {
            return RefreshOutcome::Skipped;
        };
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => RefreshOutcome::Failed(Error::Runtime(format!("refresh task lost: {}", e))),
        }
    }

    fn spawn_refresh(&self) -> Option<JoinHandle<RefreshOutcome>> {
        let Some(guard) = InFlightGuard::acquire(&self.inner) else {
            self.inner.stats.record_coalesced();
            debug!("Refresh already in flight; not starting another");
            return None;
        };

        let inner = Arc::clone(&self.inner);
        Some(self.inner.runtime.spawn(async move { inner.refresh(guard).await }))
    }
}

impl<S: DatasetSource> Inner<S> {
    async fn refresh(self: &Arc<Self>, _guard: InFlightGuard<S>) -> RefreshOutcome {
        self.stats.record_start(self.clock.now());
        debug!("Refreshing standings");

        // The fetch runs in its own task so a panic inside the source comes
        // back as a JoinError instead of unwinding through this one.
        let inner = Arc::clone(self);
        let fetched = match self
            .runtime
            .spawn(async move { inner.source.fetch().await })
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Error::FetchPanicked(panic_message(e.into_panic()))),
            Err(e) => Err(Error::Runtime(format!("fetch task cancelled: {}", e))),
        };

        self.apply(fetched)
    }

    fn apply(&self, fetched: Result<Dataset>) -> RefreshOutcome {
        match fetched {
            Ok(dataset) if dataset.is_empty() => {
                self.stats.record_empty();
                warn!("Standings fetch returned no teams; keeping cached data");
                RefreshOutcome::Empty
            }
            Ok(dataset) => {
                let teams = dataset.len();
                let generation = self.stats.record_updated();
                let fetched_at = self.clock.now();
                self.entry
                    .store(Some(Arc::new(CacheEntry::new(dataset, fetched_at, generation))));
                info!("Standings cache updated: {} teams (generation {})", teams, generation);
                RefreshOutcome::Updated { teams, generation }
            }
            Err(e) => {
                self.stats.record_failed(e.to_string());
                warn!("Standings refresh failed: {}", e);
                RefreshOutcome::Failed(e)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TeamRecord;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;
    use tokio::sync::Semaphore;
    use tokio::time::sleep;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Data,
        Empty,
        Fail,
        Panic,
    }

    /// Scripted source. Each call takes the next step (default `Data`);
    /// `Data` yields one team whose rank is the call number.
    struct FakeSource {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Step>>,
        gate: Option<Semaphore>,
    }

    impl FakeSource {
        fn new(script: &[Step]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.iter().copied().collect()),
                gate: None,
            }
        }

        /// Every fetch blocks until `open` releases it.
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::new(&[])
            }
        }

        fn open(&self, fetches: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(fetches);
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn dataset_for_call(call: usize) -> Dataset {
        Dataset::new(vec![TeamRecord {
            rank: call.to_string(),
            team_name: format!("team-{}", call),
            ..Default::default()
        }])
    }

    impl DatasetSource for FakeSource {
        async fn fetch(&self) -> Result<Dataset> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Data);
            match step {
                Step::Data => Ok(dataset_for_call(call)),
                Step::Empty => Ok(Dataset::empty()),
                Step::Fail => Err(Error::Http("connection reset".into())),
                Step::Panic => panic!("selector blew up"),
            }
        }
    }

    const TTL: Duration = Duration::from_secs(600);

    fn coordinator(source: FakeSource, ttl: Duration) -> RefreshCoordinator<FakeSource> {
        RefreshCoordinator::new(source, ttl).expect("inside runtime")
    }

    async fn wait_idle(c: &RefreshCoordinator<FakeSource>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while c.is_refreshing() {
            assert!(Instant::now() < deadline, "refresh never finished");
            sleep(Duration::from_millis(2)).await;
        }
    }

    #[test]
    fn test_new_outside_runtime_errors() {
        let result = RefreshCoordinator::new(FakeSource::new(&[]), TTL);
        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_under_concurrent_readers() {
        let c = coordinator(FakeSource::gated(), TTL);

        std::thread::scope(|scope| {
            for _ in 0..32 {
                let c = c.clone();
                scope.spawn(move || {
                    for _ in 0..10 {
                        assert!(c.get_data().is_empty());
                    }
                });
            }
        });

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let c = c.clone();
            tasks.push(tokio::spawn(async move { c.get_data().len() }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 0);
        }

        // Let the spawned refresh reach the source before counting.
        let deadline = Instant::now() + Duration::from_secs(5);
        while c.source().calls() == 0 {
            assert!(Instant::now() < deadline, "fetch never started");
            sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(c.source().calls(), 1);
        assert!(c.is_refreshing());

        c.source().open(1);
        wait_idle(&c).await;

        assert_eq!(c.source().calls(), 1);
        assert_eq!(c.get_data().len(), 1);
        let stats = c.stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.coalesced, 32 * 10 + 32 - 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_do_not_block_on_slow_refresh() {
        let c = coordinator(FakeSource::gated(), TTL);
        c.start();
        assert!(c.is_refreshing());

        for _ in 0..100 {
            let started = Instant::now();
            let data = c.get_data();
            assert!(started.elapsed() < Duration::from_millis(10));
            assert!(data.is_empty());
        }
        assert!(c.is_refreshing());
        assert!(c.last_updated_at().is_none());

        c.source().open(1);
        wait_idle(&c).await;
        assert!(!c.get_data().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_keeps_previous_data() {
        let c = coordinator(FakeSource::new(&[Step::Data, Step::Empty]), TTL);

        assert!(matches!(
            c.refresh_now().await,
            RefreshOutcome::Updated { teams: 1, generation: 1 }
        ));
        let before = c.get_data();
        let fetched_at = c.last_updated_at();

        assert!(matches!(c.refresh_now().await, RefreshOutcome::Empty));
        assert!(c.get_data().ptr_eq(&before));
        assert_eq!(c.last_updated_at(), fetched_at);
        assert_eq!(c.stats().empty, 1);
        assert!(!c.is_refreshing());
    }

    #[tokio::test]
    async fn test_empty_result_does_not_reset_staleness_clock() {
        let c = coordinator(FakeSource::new(&[Step::Empty]), TTL);
        assert!(matches!(c.refresh_now().await, RefreshOutcome::Empty));
        assert!(c.is_stale());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flag_released_after_every_failure_kind() {
        let source = FakeSource::new(&[Step::Fail, Step::Empty, Step::Panic]);
        let c = coordinator(source, TTL);

        for expected_calls in 1..=4 {
            assert!(c.is_stale());
            c.get_data();
            wait_idle(&c).await;
            assert_eq!(c.source().calls(), expected_calls);
        }

        assert_eq!(c.get_data()[0].rank, "4");
        assert!(!c.is_stale());

        let stats = c.stats();
        assert_eq!(stats.started, 4);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.empty, 1);
        assert_eq!(stats.updated, 1);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_fetch_reports_failure() {
        let c = coordinator(FakeSource::new(&[Step::Panic]), TTL);
        match c.refresh_now().await {
            RefreshOutcome::Failed(Error::FetchPanicked(msg)) => {
                assert!(msg.contains("selector blew up"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!c.is_refreshing());
        assert!(c.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_entry() {
        let c = coordinator(FakeSource::new(&[Step::Data, Step::Fail]), TTL);
        c.refresh_now().await;
        let before = c.entry().expect("entry after success");

        assert!(matches!(c.refresh_now().await, RefreshOutcome::Failed(_)));
        let after = c.entry().expect("entry kept");
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_refresh_now_skips_while_in_flight() {
        let c = coordinator(FakeSource::gated(), TTL);
        assert!(c.trigger_refresh());
        assert!(!c.trigger_refresh());
        assert!(matches!(c.refresh_now().await, RefreshOutcome::Skipped));

        c.source().open(1);
        wait_idle(&c).await;
        assert_eq!(c.source().calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_mixed_entries() {
        // Zero TTL: every read is stale, so refreshes run back to back while
        // readers are loading.
        let c = coordinator(FakeSource::new(&[]), Duration::ZERO);
        c.refresh_now().await;

        let mut readers = Vec::new();
        for _ in 0..4 {
            let c = c.clone();
            readers.push(tokio::spawn(async move {
                let mut last: Option<Arc<CacheEntry>> = None;
                let until = Instant::now() + Duration::from_millis(200);
                while Instant::now() < until {
                    let entry = c.entry().expect("populated");
                    assert_eq!(entry.dataset[0].rank, entry.generation.to_string());
                    if let Some(prev) = &last {
                        assert!(entry.generation >= prev.generation);
                        assert!(entry.fetched_at >= prev.fetched_at);
                    }
                    last = Some(entry);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for reader in readers {
            reader.await.unwrap();
        }

        wait_idle(&c).await;
        assert!(c.source().calls() > 1);
    }

    #[tokio::test]
    async fn test_staleness_against_ttl() {
        let c = coordinator(FakeSource::new(&[]), TTL);
        let now = Utc::now();
        assert!(c.is_stale_at(now));

        c.inner.entry.store(Some(Arc::new(CacheEntry::new(
            dataset_for_call(1),
            now - TimeDelta::minutes(9),
            1,
        ))));
        assert!(!c.is_stale_at(now));

        c.inner.entry.store(Some(Arc::new(CacheEntry::new(
            dataset_for_call(1),
            now - TimeDelta::minutes(11),
            1,
        ))));
        assert!(c.is_stale_at(now));
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, by: TimeDelta) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn test_staleness_follows_injected_clock() {
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let c = RefreshCoordinator::with_clock(
            FakeSource::new(&[]),
            TTL,
            Handle::current(),
            clock.clone(),
        )
        .expect("valid ttl");
        assert!(c.is_stale());

        let fetched_at = clock.now();
        c.refresh_now().await;
        assert_eq!(c.last_updated_at(), Some(fetched_at));

        clock.advance(TimeDelta::minutes(9));
        assert!(!c.is_stale());
        c.get_data();
        assert_eq!(c.source().calls(), 1);

        clock.advance(TimeDelta::minutes(2));
        assert!(c.is_stale());
        c.get_data();
        wait_idle(&c).await;
        assert_eq!(c.source().calls(), 2);
        assert_eq!(c.last_updated_at(), Some(clock.now()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_refresh_now_keeps_single_flight() {
        let c = coordinator(FakeSource::gated(), TTL);

        let waited = tokio::time::timeout(Duration::from_millis(50), c.refresh_now()).await;
        assert!(waited.is_err(), "gated refresh should not finish");

        let deadline = Instant::now() + Duration::from_secs(5);
        while c.source().calls() == 0 {
            assert!(Instant::now() < deadline, "fetch never started");
            sleep(Duration::from_millis(1)).await;
        }

        assert!(c.is_refreshing());
        assert!(!c.trigger_refresh());
        c.get_data();
        assert_eq!(c.source().calls(), 1);

        // The abandoned refresh still lands in the cache.
        c.source().open(1);
        wait_idle(&c).await;
        assert_eq!(c.source().calls(), 1);
        assert_eq!(c.get_data()[0].rank, "1");
    }

    #[tokio::test]
    async fn test_snapshot_before_first_fetch() {
        let c = coordinator(FakeSource::gated(), TTL);
        let snapshot = c.snapshot();
        assert!(snapshot.updated_at.is_none());
        assert!(!snapshot.is_ready());
        assert!(c.is_refreshing());
    }

    #[tokio::test]
    async fn test_fresh_read_does_not_trigger() {
        let c = coordinator(FakeSource::new(&[]), TTL);
        c.refresh_now().await;
        for _ in 0..10 {
            c.get_data();
        }
        assert_eq!(c.source().calls(), 1);
        assert_eq!(c.stats().coalesced, 0);
    }
}
