//! Task pool - fixed worker threads running submitted closures
//!
//! Design:
//! - rayon thread pool, tasks queued with `spawn_fifo`
//! - Each submission gets a [`TaskHandle`] fed by a oneshot channel
//! - Panics and errors are captured per task, workers keep running
//! - `wait_for_tasks` blocks until the in-flight count drops to zero
//! - `shutdown` returns only after every worker ran its exit handler

mod global;
mod handle;


pub use global::{global, init, init_with_host, is_initialized, shutdown, submit, wait_for_tasks};
pub use handle::{TaskHandle, TaskId};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use parking_lot::{Condvar, Mutex};
use tracing::trace_span;

use crate::bridge::{host_lock_held, host_lock_held_by, HostHooks};
use crate::config::TasksConfig;
use crate::convert::narrow;
use crate::error::{PoolError, TaskError};
use crate::logging::{log_pool_drained, log_pool_shutdown, log_pool_start, log_task_failed};

/// Count of unfinished work that can be waited on
#[derive(Debug, Default)]
struct Gauge {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Gauge {
    fn starting_at(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            idle: Condvar::new(),
        }
    }

    fn enter(&self) {
        *self.count.lock() += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn current(&self) -> usize {
        *self.count.lock()
    }

    /// Block until idle, returning how many tasks were pending on entry
    fn wait_idle(&self) -> usize {
        let mut count = self.count.lock();
        let pending = *count;
        while *count > 0 {
            self.idle.wait(&mut count);
        }
        pending
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of pool activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: usize,
}

pub struct TaskPool {
    pool: rayon::ThreadPool,
    /// Submitted tasks that have not finished
    inflight: Arc<Gauge>,
    /// Worker threads that have not run their exit handler
    running: Arc<Gauge>,
    counters: Arc<Counters>,
    host: Option<Arc<dyn HostHooks>>,
    next_id: AtomicU64,
    workers: usize,
}

impl TaskPool {
    pub fn new(config: &TasksConfig) -> Result<Self, PoolError> {
        Self::build(config, None)
    }

    /// Pool whose workers register with the host on start and exit
    pub fn with_host(config: &TasksConfig, hooks: Arc<dyn HostHooks>) -> Result<Self, PoolError> {
        Self::build(config, Some(hooks))
    }

    fn build(config: &TasksConfig, hooks: Option<Arc<dyn HostHooks>>) -> Result<Self, PoolError> {
        let workers = config.worker_count();
        let prefix = config.thread_name.clone();

        let running = Arc::new(Gauge::starting_at(workers));

        let on_start = hooks.clone();
        let on_exit = hooks.clone();
        let exited = Arc::clone(&running);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |index| format!("{}-{}", prefix, index))
            .start_handler(move |_| {
                if let Some(hooks) = &on_start {
                    hooks.attach_thread();
                }
            })
            .exit_handler(move |_| {
                if let Some(hooks) = &on_exit {
                    hooks.detach_thread();
                }
                exited.leave();
            })
            .build()?;
        log_pool_start(workers, &config.thread_name);

        Ok(Self {
            pool,
            inflight: Arc::new(Gauge::default()),
            running,
            counters: Arc::new(Counters::default()),
            host: hooks,
            next_id: AtomicU64::new(1),
            workers,
        })
    }

    /// Queue `f` on a worker. Never blocks.
    pub fn submit<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(move || Ok(f()))
    }

    /// Queue a fallible closure; its `Err` is delivered as [`TaskError::Failed`]
    pub fn submit_fallible<F, T, E>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.spawn(move || f().map_err(|e| TaskError::Failed(e.into())))
    }

    fn spawn<F, T>(&self, job: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = oneshot::channel();

        self.inflight.enter();
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let inflight = Arc::clone(&self.inflight);
        let counters = Arc::clone(&self.counters);

        self.pool.spawn_fifo(move || {
            let span = trace_span!("task", id = id.get());
            let _enter = span.enter();

            let result = panic::catch_unwind(AssertUnwindSafe(job))
                .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));

            match &result {
                Ok(_) => counters.completed.fetch_add(1, Ordering::Relaxed),
                Err(error) => {
                    log_task_failed(id.get(), error);
                    counters.failed.fetch_add(1, Ordering::Relaxed)
                }
            };

            // Deliver before leaving so drained handles are resolved;
            // a dropped handle just discards the result
            let _ = sender.send(result);
            inflight.leave();
        });

        TaskHandle::new(id, receiver)
    }

    /// Block until every task submitted so far has finished.
    ///
    /// Fails instead of deadlocking when the caller holds the host lock
    /// (tasks may need it) or is itself one of this pool's workers. A pool
    /// built with a host only checks that host's lock; a pool without one
    /// checks every host.
    pub fn wait_for_tasks(&self) -> Result<(), PoolError> {
        let blocked = match &self.host {
            Some(hooks) => host_lock_held_by(&**hooks),
            None => host_lock_held(),
        };
        if blocked {
            return Err(PoolError::HostLockHeld);
        }
        if self.pool.current_thread_index().is_some() {
            return Err(PoolError::WorkerThread);
        }

        let start = Instant::now();
        let waited_for = self.inflight.wait_idle();
        let duration_us = narrow::<u128, u64>(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        log_pool_drained(waited_for, duration_us);
        Ok(())
    }

    /// Tasks submitted but not finished
    pub fn pending(&self) -> usize {
        self.inflight.current()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Drain, then stop the workers.
    ///
    /// Returns once every worker has exited its loop and run its exit
    /// handler, so host detach hooks never run after this call. Dropping a
    /// pool without calling `shutdown` does not wait for them.
    pub fn shutdown(self) -> Result<PoolStats, PoolError> {
        self.wait_for_tasks()?;
        let stats = self.stats();

        let Self { pool, running, .. } = self;
        drop(pool);
        running.wait_idle();

        log_pool_shutdown(stats.completed, stats.failed);
        Ok(stats)
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.workers)
            .field("pending", &self.pending())
            .finish()
    }
}
