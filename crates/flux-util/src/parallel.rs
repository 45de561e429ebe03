use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use flux_core::{FluxError, Result};

/// A place to run tasks. [`ParallelTaskProcessor::run_on`] never calls any
/// shutdown-like method on the executor it is given — spec §4.K: "when
/// passed an external executor, the executor must not be shut down on
/// return."
pub trait TaskExecutor: Send + Sync {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// An executor that owns a fixed pool of OS threads for the lifetime of
/// the value; dropping it does not join outstanding work, so callers that
/// want join semantics should rely on [`ParallelTaskProcessor::run`]'s
/// internal pool instead of holding onto one of these past a single call.
struct ScopedPool;

impl TaskExecutor for ScopedPool {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        thread::spawn(task);
    }
}

struct CountdownLatch {
    remaining: Mutex<usize>,
    condvar: Condvar,
}

impl CountdownLatch {
    fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
        }
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }

    fn wait(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        while *remaining > 0 {
            remaining = self.condvar.wait(remaining).unwrap();
        }
    }
}

/// Fans an iterable of tasks out across a worker count (or a caller-
/// supplied [`TaskExecutor`]). On the first failure, remaining queued tasks
/// are skipped and the original error is returned once every in-flight
/// task has finished (spec §4.K "ParallelTaskProcessor").
pub struct ParallelTaskProcessor;

impl ParallelTaskProcessor {
    /// Runs `tasks` across `worker_count` threads owned by this call; all
    /// threads are joined before returning.
    pub fn run<T, F>(tasks: Vec<T>, worker_count: usize, task_fn: F) -> Result<()>
    where
        T: Send + 'static,
        F: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        Self::run_on(&ScopedPool, tasks, worker_count, task_fn)
    }

    /// Runs `tasks` using `executor` for thread placement. The executor is
    /// never told to shut down; this call blocks until every dispatched
    /// task has returned.
    pub fn run_on<T, F>(
        executor: &dyn TaskExecutor,
        tasks: Vec<T>,
        worker_count: usize,
        task_fn: F,
    ) -> Result<()>
    where
        T: Send + 'static,
        F: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        if tasks.is_empty() {
            return Ok(());
        }
        let worker_count = worker_count.clamp(1, tasks.len());
        let (sender, receiver) = crossbeam_channel::unbounded();
        for task in tasks {
            sender.send(task).expect("receiver outlives this scope");
        }
        drop(sender);

        let cancelled = Arc::new(AtomicBool::new(false));
        let first_error: Arc<Mutex<Option<FluxError>>> = Arc::new(Mutex::new(None));
        let latch = Arc::new(CountdownLatch::new(worker_count));
        let task_fn = Arc::new(task_fn);

        for _ in 0..worker_count {
            let receiver = receiver.clone();
            let cancelled = cancelled.clone();
            let first_error = first_error.clone();
            let latch = latch.clone();
            let task_fn = task_fn.clone();
            executor.spawn(Box::new(move || {
                while let Ok(task) = receiver.recv() {
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(err) = task_fn(task) {
                        let mut guard = first_error.lock().unwrap();
                        if guard.is_none() {
                            *guard = Some(err);
                        }
                        cancelled.store(true, Ordering::Release);
                        break;
                    }
                }
                latch.count_down();
            }));
        }

        latch.wait();

        match first_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
