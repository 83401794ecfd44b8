//! Bounded-concurrency scheduler for preview jobs.
//!
//! One job occupies one execution slot for the whole span of its fallback
//! chain: admission pops the FIFO queue while `in_use < capacity`, the
//! admitted job walks the chain of available backends sequentially, and the
//! terminal transition (success or exhaustion) reports to the sink, releases
//! the slot and immediately admits the next queued job. The queue and the
//! slot counter live behind a single mutex so check-and-increment is one
//! indivisible step and over-admission is impossible.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::backends::{BackendSet, PreviewBackend};
use crate::config::Config;
use crate::error::BackendError;

use super::job::{JobHandle, PreviewOutcome, PreviewRequest, PreviewResult};

/// An admitted or queued unit of preview work.
struct Job {
    handle: JobHandle,
    source: PathBuf,
    target: PathBuf,
    max_width: u32,
    max_height: u32,
    sink: flume::Sender<PreviewOutcome>,
}

struct SchedState {
    queue: VecDeque<Job>,
    in_use: usize,
}

struct Inner {
    backends: Arc<BackendSet>,
    scratch_dir: PathBuf,
    capacity: usize,
    attempt_timeout: Option<Duration>,
    next_id: AtomicU64,
    state: Mutex<SchedState>,
}

/// Admission controller for preview generation.
///
/// Cheap to clone; all clones share the queue and the slot pool. Must be
/// used from within a tokio runtime (each admitted job runs as a task).
#[derive(Clone)]
pub struct PreviewScheduler {
    inner: Arc<Inner>,
}

impl PreviewScheduler {
    /// Create a scheduler from the loaded configuration.
    pub fn new(backends: Arc<BackendSet>, config: &Config) -> Self {
        Self::with_capacity(
            backends,
            config.scratch_dir.clone(),
            config.capacity,
            config.attempt_timeout,
        )
    }

    /// Create a scheduler with an explicit slot capacity.
    pub fn with_capacity(
        backends: Arc<BackendSet>,
        scratch_dir: PathBuf,
        capacity: usize,
        attempt_timeout: Option<Duration>,
    ) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, ?scratch_dir, "Created preview scheduler");

        Self {
            inner: Arc::new(Inner {
                backends,
                scratch_dir,
                capacity,
                attempt_timeout,
                next_id: AtomicU64::new(1),
                state: Mutex::new(SchedState {
                    queue: VecDeque::new(),
                    in_use: 0,
                }),
            }),
        }
    }

    /// Submit a preview job. The job is appended to the FIFO queue and
    /// admitted immediately if a slot is free.
    ///
    /// Every submission is an independent job, even for a source already
    /// queued or in flight.
    pub fn submit(&self, request: PreviewRequest) -> JobHandle {
        let handle = JobHandle(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let target = target_path(&self.inner.scratch_dir, &request.source);

        trace!(id = handle.id(), source = ?request.source, "Submitted preview job");

        self.inner.state.lock().queue.push_back(Job {
            handle,
            source: request.source,
            target,
            max_width: request.max_width,
            max_height: request.max_height,
            sink: request.sink,
        });

        pump(&self.inner);
        handle
    }

    /// Discard all queued (not yet admitted) jobs.
    ///
    /// Jobs already attempting are not preempted; their outcomes are still
    /// delivered and the sink is responsible for discarding stale ones.
    pub fn clear_pending(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        debug!(dropped, "Cleared pending preview jobs");
    }

    /// Number of slots currently occupied.
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use
    }

    /// Number of jobs waiting for a slot.
    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Fixed slot capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// Admit queued jobs while slots are free.
fn pump(inner: &Arc<Inner>) {
    loop {
        let job = {
            let mut state = inner.state.lock();
            if state.in_use >= inner.capacity {
                return;
            }
            match state.queue.pop_front() {
                Some(job) => {
                    state.in_use += 1;
                    job
                }
                None => return,
            }
        };

        // Chain is fixed at admission time; availability is not
        // re-evaluated mid-chain.
        let chain = inner.backends.fallback_chain();
        tokio::spawn(run_job(Arc::clone(inner), job, chain));
    }
}

/// Walk the fallback chain for one admitted job, report the terminal result
/// and release the slot.
async fn run_job(inner: Arc<Inner>, job: Job, chain: Vec<Arc<dyn PreviewBackend>>) {
    let mut result = PreviewResult::Unavailable;

    for backend in &chain {
        match attempt(&inner, backend.as_ref(), &job).await {
            Ok(()) => {
                trace!(id = job.handle.id(), backend = backend.name(), "Preview ready");
                result = PreviewResult::Ready(job.target.clone());
                break;
            }
            Err(e) => {
                debug!(
                    id = job.handle.id(),
                    backend = backend.name(),
                    error = %e,
                    "Backend attempt failed, advancing chain"
                );
            }
        }
    }

    if result == PreviewResult::Unavailable {
        debug!(id = job.handle.id(), source = ?job.source, "No preview available");
    }

    // The sink may have moved on (directory change); a closed channel is
    // not an error here.
    let _ = job.sink.send(PreviewOutcome {
        job: job.handle,
        source: job.source,
        result,
    });

    {
        let mut state = inner.state.lock();
        state.in_use -= 1;
    }

    pump(&inner);
}

/// One backend attempt, bounded by the configured timeout if any.
async fn attempt(
    inner: &Inner,
    backend: &dyn PreviewBackend,
    job: &Job,
) -> Result<(), BackendError> {
    let fut = backend.create_preview(&job.source, &job.target, job.max_width, job.max_height);

    match inner.attempt_timeout {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(backend = backend.name(), ?limit, "Backend attempt timed out");
                Err(BackendError::TimedOut {
                    tool: backend.name(),
                })
            }
        },
    }
}

/// Target path for a source file inside the scratch directory: original
/// basename plus a hash of the full path, so files with equal names from
/// different directories cannot collide.
fn target_path(scratch_dir: &Path, source: &Path) -> PathBuf {
    let hash = xxh3_64(source.to_string_lossy().as_bytes());
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preview".to_string());
    scratch_dir.join(format!("{}-{:016x}.jpg", name, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Test backend with scripted outcome and shared concurrency counters.
    struct FakeBackend {
        name: &'static str,
        ok: bool,
        delay: Duration,
        attempts: AtomicUsize,
        order: PlMutex<Vec<PathBuf>>,
        gate: Option<Arc<Notify>>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        fn new(name: &'static str, ok: bool) -> Arc<Self> {
            Self::build(name, ok, Duration::ZERO, None, Arc::default(), Arc::default())
        }

        fn build(
            name: &'static str,
            ok: bool,
            delay: Duration,
            gate: Option<Arc<Notify>>,
            running: Arc<AtomicUsize>,
            max_running: Arc<AtomicUsize>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                ok,
                delay,
                attempts: AtomicUsize::new(0),
                order: PlMutex::new(Vec::new()),
                gate,
                running,
                max_running,
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PreviewBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn probe(&self) -> bool {
            true
        }

        async fn create_preview(
            &self,
            source: &Path,
            _target: &Path,
            _max_width: u32,
            _max_height: u32,
        ) -> Result<(), BackendError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(source.to_path_buf());

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.ok {
                Ok(())
            } else {
                Err(BackendError::Failed {
                    tool: self.name,
                    code: Some(1),
                    stderr: String::new(),
                })
            }
        }
    }

    fn set_of(backends: Vec<Arc<FakeBackend>>) -> Arc<BackendSet> {
        let names: Vec<_> = backends.iter().map(|b| b.name).collect();
        let set = BackendSet::new(
            backends
                .into_iter()
                .map(|b| b as Arc<dyn PreviewBackend>)
                .collect(),
        );
        for name in names {
            set.mark_available(name);
        }
        Arc::new(set)
    }

    fn scheduler(set: Arc<BackendSet>, capacity: usize) -> (PreviewScheduler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sched =
            PreviewScheduler::with_capacity(set, dir.path().to_path_buf(), capacity, None);
        (sched, dir)
    }

    fn request(source: &str, sink: &flume::Sender<PreviewOutcome>) -> PreviewRequest {
        PreviewRequest {
            source: PathBuf::from(source),
            max_width: 128,
            max_height: 128,
            sink: sink.clone(),
        }
    }

    async fn recv(rx: &flume::Receiver<PreviewOutcome>) -> PreviewOutcome {
        tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .expect("timed out waiting for outcome")
            .expect("sink channel closed")
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_use_never_exceeds_capacity() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let a = FakeBackend::build(
            "a",
            false,
            Duration::from_millis(15),
            None,
            Arc::clone(&running),
            Arc::clone(&max_running),
        );
        let b = FakeBackend::build(
            "b",
            false,
            Duration::from_millis(15),
            None,
            Arc::clone(&running),
            Arc::clone(&max_running),
        );

        let (sched, _dir) = scheduler(set_of(vec![a, b]), 2);
        let (tx, rx) = flume::unbounded();

        for i in 0..6 {
            sched.submit(request(&format!("/photos/img{}.nef", i), &tx));
        }

        for _ in 0..6 {
            let outcome = recv(&rx).await;
            assert_eq!(outcome.result, PreviewResult::Unavailable);
        }

        assert!(max_running.load(Ordering::SeqCst) <= 2);
        assert_eq!(sched.in_use(), 0);
        assert_eq!(sched.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_resolves_without_attempts() {
        // Backend exists but was never probed available.
        let a = FakeBackend::new("a", true);
        let set = Arc::new(BackendSet::new(vec![
            Arc::clone(&a) as Arc<dyn PreviewBackend>
        ]));

        let (sched, _dir) = scheduler(set, 1);
        let (tx, rx) = flume::unbounded();

        sched.submit(request("/photos/img.nef", &tx));
        let outcome = recv(&rx).await;

        assert_eq!(outcome.result, PreviewResult::Unavailable);
        assert_eq!(a.attempts(), 0);
        assert_eq!(sched.in_use(), 0);
    }

    #[tokio::test]
    async fn test_priority_order_stops_after_success() {
        let a = FakeBackend::new("a", false);
        let b = FakeBackend::new("b", true);
        let c = FakeBackend::new("c", true);
        let set = set_of(vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);

        let (sched, dir) = scheduler(set, 1);
        let (tx, rx) = flume::unbounded();

        sched.submit(request("/photos/img.nef", &tx));
        let outcome = recv(&rx).await;

        match outcome.result {
            PreviewResult::Ready(path) => {
                assert!(path.starts_with(dir.path()));
                assert!(path.to_string_lossy().ends_with(".jpg"));
            }
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(a.attempts(), 1);
        assert_eq!(b.attempts(), 1);
        assert_eq!(c.attempts(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_submissions_complete_independently() {
        let b = FakeBackend::new("b", true);
        let set = set_of(vec![Arc::clone(&b)]);

        let (sched, _dir) = scheduler(set, 1);
        let (tx, rx) = flume::unbounded();

        let h1 = sched.submit(request("/photos/img.nef", &tx));
        let h2 = sched.submit(request("/photos/img.nef", &tx));
        assert_ne!(h1, h2);

        let o1 = recv(&rx).await;
        let o2 = recv(&rx).await;
        assert!(matches!(o1.result, PreviewResult::Ready(_)));
        assert!(matches!(o2.result, PreviewResult::Ready(_)));
        assert_eq!(b.attempts(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_jobs_complete_when_over_capacity() {
        // capacity = 2, 3 jobs, all providers fail instantly: none starve.
        let a = FakeBackend::new("a", false);
        let set = set_of(vec![Arc::clone(&a)]);

        let (sched, _dir) = scheduler(set, 2);
        let (tx, rx) = flume::unbounded();

        for i in 0..3 {
            sched.submit(request(&format!("/photos/img{}.nef", i), &tx));
        }

        for _ in 0..3 {
            assert_eq!(recv(&rx).await.result, PreviewResult::Unavailable);
        }
        assert_eq!(a.attempts(), 3);
        assert_eq!(sched.in_use(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_jobs_two_slots_fallback_to_second() {
        let a = FakeBackend::new("a", false);
        let b = FakeBackend::new("b", true);
        let set = set_of(vec![Arc::clone(&a), Arc::clone(&b)]);

        let (sched, _dir) = scheduler(set, 2);
        let (tx, rx) = flume::unbounded();

        for i in 0..3 {
            sched.submit(request(&format!("/photos/img{}.nef", i), &tx));
        }

        for _ in 0..3 {
            assert!(matches!(recv(&rx).await.result, PreviewResult::Ready(_)));
        }
        // Every job tried A first, then succeeded on B.
        assert_eq!(a.attempts(), 3);
        assert_eq!(b.attempts(), 3);
        assert_eq!(sched.in_use(), 0);
    }

    #[tokio::test]
    async fn test_no_providers_slot_returns_before_next_admission() {
        let set = Arc::new(BackendSet::new(Vec::new()));
        let (sched, _dir) = scheduler(set, 1);
        let (tx, rx) = flume::unbounded();

        sched.submit(request("/photos/a.nef", &tx));
        sched.submit(request("/photos/b.nef", &tx));

        assert_eq!(recv(&rx).await.result, PreviewResult::Unavailable);
        assert_eq!(recv(&rx).await.result, PreviewResult::Unavailable);
        assert_eq!(sched.in_use(), 0);
        assert_eq!(sched.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_fifo_admission_order() {
        let b = FakeBackend::new("b", true);
        let set = set_of(vec![Arc::clone(&b)]);

        let (sched, _dir) = scheduler(set, 1);
        let (tx, rx) = flume::unbounded();

        let sources = ["/photos/1.nef", "/photos/2.nef", "/photos/3.nef"];
        for src in sources {
            sched.submit(request(src, &tx));
        }
        for _ in 0..3 {
            recv(&rx).await;
        }

        let order = b.order.lock().clone();
        let expected: Vec<PathBuf> = sources.iter().map(PathBuf::from).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clear_pending_drops_queued_jobs_only() {
        let gate = Arc::new(Notify::new());
        let b = FakeBackend::build(
            "b",
            true,
            Duration::ZERO,
            Some(Arc::clone(&gate)),
            Arc::default(),
            Arc::default(),
        );
        let set = set_of(vec![Arc::clone(&b)]);

        let (sched, _dir) = scheduler(set, 1);
        let (tx, rx) = flume::unbounded();

        sched.submit(request("/photos/1.nef", &tx));
        sched.submit(request("/photos/2.nef", &tx));
        sched.submit(request("/photos/3.nef", &tx));

        // First job admitted and parked at the gate; two remain queued.
        wait_until(|| b.attempts() == 1).await;
        assert_eq!(sched.queued_len(), 2);

        sched.clear_pending();
        assert_eq!(sched.queued_len(), 0);

        gate.notify_one();
        let outcome = recv(&rx).await;
        assert_eq!(outcome.source, PathBuf::from("/photos/1.nef"));

        // No further outcomes and no further provider invocations.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv_async())
                .await
                .is_err()
        );
        assert_eq!(b.attempts(), 1);
        assert_eq!(sched.in_use(), 0);
    }

    #[tokio::test]
    async fn test_attempt_timeout_advances_chain() {
        let gate = Arc::new(Notify::new());
        let slow = FakeBackend::build(
            "slow",
            true,
            Duration::ZERO,
            Some(Arc::clone(&gate)),
            Arc::default(),
            Arc::default(),
        );
        let b = FakeBackend::new("b", true);
        let set = set_of(vec![Arc::clone(&slow), Arc::clone(&b)]);

        let dir = tempfile::tempdir().unwrap();
        let sched = PreviewScheduler::with_capacity(
            set,
            dir.path().to_path_buf(),
            1,
            Some(Duration::from_millis(50)),
        );
        let (tx, rx) = flume::unbounded();

        sched.submit(request("/photos/img.nef", &tx));
        let outcome = recv(&rx).await;

        assert!(matches!(outcome.result, PreviewResult::Ready(_)));
        assert_eq!(slow.attempts(), 1);
        assert_eq!(b.attempts(), 1);
    }

    #[test]
    fn test_capacity_clamped_to_at_least_one() {
        let set = Arc::new(BackendSet::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let sched = PreviewScheduler::with_capacity(set, dir.path().to_path_buf(), 0, None);
        assert_eq!(sched.capacity(), 1);
    }

    #[test]
    fn test_target_path_is_stable_and_collision_free() {
        let scratch = Path::new("/tmp/previews");
        let p1 = target_path(scratch, Path::new("/a/img.nef"));
        let p2 = target_path(scratch, Path::new("/b/img.nef"));

        assert_eq!(p1, target_path(scratch, Path::new("/a/img.nef")));
        assert_ne!(p1, p2);
        assert!(p1.starts_with(scratch));
        assert!(p1.file_name().unwrap().to_string_lossy().starts_with("img.nef-"));
        assert!(p1.to_string_lossy().ends_with(".jpg"));
    }
}
