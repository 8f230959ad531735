//! Bounded worker pool for the accept loop and relay sessions
//!
//! The pool is a dedicated multi-thread runtime with a fixed number of worker
//! threads. Every task runs under the pool's cancellation token, so shutting
//! the pool down unblocks pending accepts and reads at once and drops the
//! sockets they own. Nothing is drained.

use std::future::Future;
use std::io;
use std::sync::mpsc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

pub struct WorkerPool {
    runtime: Option<Runtime>,
    spawner: PoolSpawner,
    workers: usize,
}

/// Cloneable handle for spawning onto a [`WorkerPool`]
#[derive(Clone)]
pub struct PoolSpawner {
    handle: Handle,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Start a pool with `workers` threads (at least one)
    pub fn new(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("relay-worker")
            .enable_all()
            .build()?;

        let spawner = PoolSpawner {
            handle: runtime.handle().clone(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        debug!("Worker pool started with {} threads", workers);
        Ok(Self {
            runtime: Some(runtime),
            spawner,
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn spawner(&self) -> PoolSpawner {
        self.spawner.clone()
    }

    /// Spawn a task; see [`PoolSpawner::spawn`]
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawner.spawn(task)
    }

    /// Token cancelled when the pool shuts down
    pub fn cancellation_token(&self) -> CancellationToken {
        self.spawner.cancel.clone()
    }

    /// Tasks spawned and not yet finished
    pub fn active_tasks(&self) -> usize {
        self.spawner.tracker.len()
    }

    /// Spawn a task whose end can be awaited from synchronous code
    pub fn spawn_joinable<F>(&self, task: F) -> TaskDone
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawner.spawn_joinable(task)
    }

    /// Signal every task to stop and refuse new ones. Worker threads keep
    /// running until [`shutdown`](Self::shutdown).
    pub fn cancel(&self) {
        self.spawner.cancel.cancel();
        self.spawner.tracker.close();
    }

    /// Cancel every task and release the worker threads.
    ///
    /// Returns without waiting for the threads to exit, so it is safe to call
    /// from inside another runtime. Use [`TaskDone::wait`] first when a task
    /// owns a resource that must be gone by the time this returns.
    pub fn shutdown(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        self.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!("Worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

impl PoolSpawner {
    /// Run `task` on the pool until it completes or the pool is cancelled.
    ///
    /// Returns `false` without spawning once the pool is shutting down.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_inner(task, None)
    }

    /// Like [`spawn`](Self::spawn), and the returned [`TaskDone`] fires once
    /// `task` has finished or been dropped. If the pool is already shutting
    /// down nothing is spawned and the signal fires at once.
    pub fn spawn_joinable<F>(&self, task: F) -> TaskDone
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.spawn_inner(task, Some(tx));
        TaskDone { rx }
    }

    fn spawn_inner<F>(&self, task: F, done: Option<mpsc::Sender<()>>) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }

        let cancel = self.cancel.clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = task => {}
                }
                // `task` has been dropped by now, along with whatever it owned
                if let Some(done) = done {
                    let _ = done.send(());
                }
            },
            &self.handle,
        );
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Completion signal for a task spawned with [`PoolSpawner::spawn_joinable`]
#[derive(Debug)]
pub struct TaskDone {
    rx: mpsc::Receiver<()>,
}

impl TaskDone {
    /// Block until the task has ended, up to `timeout`. Returns `false` on
    /// timeout.
    ///
    /// The task runs on the pool's own threads, so this may be called from
    /// inside another runtime.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(
            self.rx.recv_timeout(timeout),
            Err(mpsc::RecvTimeoutError::Timeout)
        )
    }
}
