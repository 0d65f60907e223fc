//! Spreading lookups over isolated workers.
//!
//! Every worker opens its own backend connection and nothing mutable is shared with the parent or
//! other workers. The parent only waits: it never inspects a worker while it runs.

use std::{
    ffi::OsString,
    fmt::{Debug, Formatter},
    num::NonZeroU64,
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::Arc,
    thread,
};

use anyhow::Context;
use kvs::{Backend, BackendKind};
use log::{debug, warn};

use crate::{
    cli::Cli,
    worker::{self, WorkerReport},
};

/// How a worker ended.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WorkerExit {
    Finished,
    Failed(String),
}

/// A started worker that can be waited for.
pub trait Join {
    /// Blocks until the worker has terminated, whatever the outcome.
    fn join(self) -> WorkerExit;
}

/// Starts workers, each running `ops` lookups.
pub trait Spawn {
    type Worker: Join;

    fn spawn(&self, index: u64, ops: u64) -> anyhow::Result<Self::Worker>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ParallelOutcome {
    pub workers: u64,
    pub ops_per_worker: u64,
    pub failed: u64,
}

impl ParallelOutcome {
    /// Lookups the batch was asked to run; `workers * (total / workers)`.
    pub fn planned_ops(&self) -> u64 {
        self.workers * self.ops_per_worker
    }
}

/// Runs `total` lookups as `workers` equal shares.
///
/// Each worker gets `total / workers` lookups; the remainder is not run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ParallelRunner {
    total: u64,
    workers: NonZeroU64,
}

impl ParallelRunner {
    pub fn new(total: u64, workers: NonZeroU64) -> Self {
        Self { total, workers }
    }

    pub fn ops_per_worker(&self) -> u64 {
        self.total / self.workers
    }

    pub fn dropped_ops(&self) -> u64 {
        self.total % self.workers
    }

    /// Starts every worker, then waits for all of them.
    ///
    /// Worker failures are counted, not returned. If a worker cannot be started, the ones already
    /// running are still waited for before the error is returned.
    pub fn run<S: Spawn>(&self, spawner: &S) -> anyhow::Result<ParallelOutcome> {
        let ops = self.ops_per_worker();
        // Not pre-sized: the worker count is unbounded user input.
        let mut running = Vec::new();
        let mut spawn_error = None;
        for index in 0..self.workers.get() {
            match spawner.spawn(index, ops) {
                Ok(worker) => running.push((index, worker)),
                Err(e) => {
                    spawn_error = Some(e.context(format!("could not start worker {index}")));
                    break;
                }
            }
        }
        debug!("{} workers started, {ops} lookups each", running.len());

        let mut failed = 0;
        for (index, worker) in running {
            if let WorkerExit::Failed(reason) = worker.join() {
                warn!("worker {index} failed: {reason}");
                failed += 1;
            }
        }

        match spawn_error {
            Some(e) => Err(e),
            None => Ok(ParallelOutcome {
                workers: self.workers.get(),
                ops_per_worker: ops,
                failed,
            }),
        }
    }
}

/// Runs each worker as a child process: this executable again, with the hidden `worker`
/// subcommand.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    exe: PathBuf,
    global_args: Vec<OsString>,
    backend: BackendKind,
}

impl ProcessSpawner {
    pub fn new(exe: PathBuf, global_args: Vec<OsString>, backend: BackendKind) -> Self {
        Self {
            exe,
            global_args,
            backend,
        }
    }

    /// Spawns workers from the running executable, configured like `cli`.
    pub fn current(cli: &Cli, backend: BackendKind) -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("could not locate the running executable")?;
        Ok(Self::new(exe, cli.worker_args(), backend))
    }
}

impl Spawn for ProcessSpawner {
    type Worker = Child;

    fn spawn(&self, index: u64, ops: u64) -> anyhow::Result<Child> {
        let child = Command::new(&self.exe)
            .args(&self.global_args)
            .arg("worker")
            .args(["--backend", self.backend.name()])
            .args(["--index", &index.to_string()])
            .args(["--ops", &ops.to_string()])
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {}", self.exe.display()))?;
        Ok(child)
    }
}

impl Join for Child {
    fn join(mut self) -> WorkerExit {
        match self.wait() {
            Ok(status) if status.success() => WorkerExit::Finished,
            Ok(status) => WorkerExit::Failed(format!("process {} {status}", self.id())),
            Err(e) => WorkerExit::Failed(format!("could not wait for process {}: {e}", self.id())),
        }
    }
}

/// Runs each worker on its own OS thread with its own connection.
pub struct ThreadSpawner<F> {
    size: u64,
    seed: Option<u64>,
    connect: Arc<F>,
}

impl<F> ThreadSpawner<F>
where
    F: Fn(u64) -> anyhow::Result<Box<dyn Backend>> + Send + Sync + 'static,
{
    /// `connect` is called once per worker, on the worker's thread, with the worker index.
    pub fn new(size: u64, seed: Option<u64>, connect: F) -> Self {
        Self {
            size,
            seed,
            connect: Arc::new(connect),
        }
    }
}

impl<F> Debug for ThreadSpawner<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSpawner")
            .field("size", &self.size)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl<F> Spawn for ThreadSpawner<F>
where
    F: Fn(u64) -> anyhow::Result<Box<dyn Backend>> + Send + Sync + 'static,
{
    type Worker = thread::JoinHandle<WorkerReport>;

    fn spawn(&self, index: u64, ops: u64) -> anyhow::Result<Self::Worker> {
        let connect = Arc::clone(&self.connect);
        let keys = worker::keys_for(self.size, self.seed, index);
        let handle = thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || worker::run(index, ops, keys, || (*connect)(index)))?;
        Ok(handle)
    }
}

impl Join for thread::JoinHandle<WorkerReport> {
    fn join(self) -> WorkerExit {
        match thread::JoinHandle::join(self) {
            Ok(report) if report.succeeded() => WorkerExit::Finished,
            Ok(report) => WorkerExit::Failed(report.failure.unwrap_or_default()),
            Err(_) => WorkerExit::Failed("worker thread panicked".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use anyhow::anyhow;
    use kvs::{Row, Sample};

    use super::*;

    #[derive(Debug, Default)]
    struct Counters {
        connects: AtomicU64,
        lookups: AtomicU64,
        closes: AtomicU64,
        per_worker: Mutex<Vec<(u64, u64)>>,
    }

    /// Answers every lookup with "not found", optionally failing the `fail_at`th one.
    #[derive(Debug)]
    struct FakeBackend {
        index: u64,
        done: u64,
        fail_at: Option<u64>,
        counters: Arc<Counters>,
    }

    impl Backend for FakeBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Sqlite
        }

        fn reset(&mut self) -> kvs::Result<()> {
            Ok(())
        }

        fn setup(&mut self, _: &Sample) -> kvs::Result<()> {
            Ok(())
        }

        fn insert_one(&mut self, _: &Row) -> kvs::Result<()> {
            Ok(())
        }

        fn lookup(&mut self, _: u64) -> kvs::Result<Option<Row>> {
            if Some(self.done) == self.fail_at {
                return Err(kvs::Error::Io(std::io::Error::other("injected failure")));
            }
            // Keep workers overlapping so the join has something to wait for.
            thread::sleep(Duration::from_micros(200));
            self.done += 1;
            self.counters.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        fn count(&mut self) -> kvs::Result<u64> {
            Ok(0)
        }

        fn close(self: Box<Self>) -> kvs::Result<()> {
            self.counters.per_worker.lock().unwrap().push((self.index, self.done));
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn runner(total: u64, workers: u64) -> ParallelRunner {
        ParallelRunner::new(total, NonZeroU64::new(workers).unwrap())
    }

    fn spawner(
        counters: &Arc<Counters>,
        fail: Option<(u64, u64)>,
    ) -> ThreadSpawner<impl Fn(u64) -> anyhow::Result<Box<dyn Backend>> + Send + Sync + 'static> {
        let counters = Arc::clone(counters);
        ThreadSpawner::new(100, Some(1), move |index| {
            counters.connects.fetch_add(1, Ordering::SeqCst);
            let fail_at = fail.and_then(|(worker, op)| (worker == index).then_some(op));
            Ok(Box::new(FakeBackend {
                index,
                done: 0,
                fail_at,
                counters: Arc::clone(&counters),
            }) as Box<dyn Backend>)
        })
    }

    #[test]
    fn even_split() {
        let counters = Arc::new(Counters::default());
        let outcome = runner(100, 4).run(&spawner(&counters, None)).unwrap();
        assert_eq!(
            outcome,
            ParallelOutcome {
                workers: 4,
                ops_per_worker: 25,
                failed: 0
            }
        );
        assert_eq!(counters.connects.load(Ordering::SeqCst), 4);
        assert_eq!(counters.lookups.load(Ordering::SeqCst), 100);
        let mut per_worker = counters.per_worker.lock().unwrap().clone();
        per_worker.sort();
        assert_eq!(per_worker, [(0, 25), (1, 25), (2, 25), (3, 25)]);
    }

    #[test]
    fn failing_worker_is_still_joined() {
        let counters = Arc::new(Counters::default());
        // Worker 2 fails on its 13th lookup (index 12).
        let outcome = runner(100, 4).run(&spawner(&counters, Some((2, 12)))).unwrap();
        assert_eq!(outcome.workers, 4);
        assert_eq!(outcome.failed, 1);
        // Every worker, the failed one included, closed its connection before `run` returned.
        assert_eq!(counters.closes.load(Ordering::SeqCst), 4);
        assert_eq!(counters.lookups.load(Ordering::SeqCst), 3 * 25 + 12);
        let mut per_worker = counters.per_worker.lock().unwrap().clone();
        per_worker.sort();
        assert_eq!(per_worker, [(0, 25), (1, 25), (2, 12), (3, 25)]);
    }

    #[test]
    fn remainder_is_dropped() {
        let counters = Arc::new(Counters::default());
        let runner = runner(100, 3);
        assert_eq!(runner.ops_per_worker(), 33);
        assert_eq!(runner.dropped_ops(), 1);
        let outcome = runner.run(&spawner(&counters, None)).unwrap();
        assert_eq!(outcome.planned_ops(), 99);
        assert_eq!(counters.lookups.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn connect_failure_counts_as_failed_worker() {
        let spawner = ThreadSpawner::new(10, None, |index| {
            if index == 1 {
                Err(anyhow!("connection refused"))
            } else {
                Ok(Box::new(FakeBackend {
                    index,
                    done: 0,
                    fail_at: None,
                    counters: Arc::new(Counters::default()),
                }) as Box<dyn Backend>)
            }
        });
        let outcome = runner(10, 2).run(&spawner).unwrap();
        assert_eq!(outcome.failed, 1);
    }

    struct FlakySpawner {
        inner: ThreadSpawner<Box<dyn Fn(u64) -> anyhow::Result<Box<dyn Backend>> + Send + Sync>>,
        refuse_from: u64,
    }

    impl Spawn for FlakySpawner {
        type Worker = thread::JoinHandle<WorkerReport>;

        fn spawn(&self, index: u64, ops: u64) -> anyhow::Result<Self::Worker> {
            if index >= self.refuse_from {
                return Err(anyhow!("fork failed"));
            }
            self.inner.spawn(index, ops)
        }
    }

    fn flaky(counters: &Arc<Counters>, refuse_from: u64) -> FlakySpawner {
        let c = Arc::clone(counters);
        let connect: Box<dyn Fn(u64) -> anyhow::Result<Box<dyn Backend>> + Send + Sync> = Box::new(move |index: u64| {
            anyhow::Ok(Box::new(FakeBackend {
                index,
                done: 0,
                fail_at: None,
                counters: Arc::clone(&c),
            }) as Box<dyn Backend>)
        });
        FlakySpawner {
            inner: ThreadSpawner::new(100, None, connect),
            refuse_from,
        }
    }

    #[test]
    fn spawn_failure_joins_started_workers() {
        let counters = Arc::new(Counters::default());
        let err = runner(100, 4).run(&flaky(&counters, 2)).unwrap_err();
        assert!(format!("{err:#}").contains("could not start worker 2"), "{err:#}");
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
        assert_eq!(counters.lookups.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn huge_worker_count_starts_lazily() {
        let counters = Arc::new(Counters::default());
        let err = runner(10, u64::MAX).run(&flaky(&counters, 2)).unwrap_err();
        assert!(format!("{err:#}").contains("could not start worker 2"), "{err:#}");
        // Both started workers had a zero share and were still joined.
        assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
        assert_eq!(counters.lookups.load(Ordering::SeqCst), 0);
    }
}
