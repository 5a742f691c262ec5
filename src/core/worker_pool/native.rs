//! Native implementation of `WorkerPool` using OS threads.
//!
//! Jobs are handed over through a zero-capacity channel: `try_send` only
//! succeeds if a worker is parked in `recv`, which is exactly the "idle worker
//! available" condition. Otherwise the submitting thread spawns a new worker
//! and gives it the job directly.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;

use super::{Job, PoolCounters, PoolError, PoolStats};

/// Worker pool with on-demand OS threads.
///
/// # Design
///
/// - **No polling**: idle workers block on the hand-off channel
/// - **Clean shutdown**: dropping the sender unblocks all idle workers
/// - **Lock-free counters**: statistics are plain atomics
pub struct WorkerPool {
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Hand-off sender. Option allows clean shutdown by dropping.
    handoff_tx: Mutex<Option<Sender<Job>>>,

    /// Hand-off receiver, cloned into every new worker.
    handoff_rx: Receiver<Job>,

    /// Pool statistics counters.
    counters: Arc<PoolCounters>,

    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,

    /// Live worker threads by worker id.
    workers: Arc<Mutex<HashMap<usize, JoinHandle<()>>>>,

    /// Worker id counter.
    worker_id_counter: AtomicUsize,
}

impl WorkerPool {
    /// Create a new worker pool. No thread is spawned until the first job.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (handoff_tx, handoff_rx) = bounded::<Job>(0);

        info!(
            max_workers = ?config.max_workers,
            keep_alive_ms = config.keep_alive_ms,
            "WorkerPool initialized with on-demand worker threads"
        );

        Ok(Self {
            config,
            handoff_tx: Mutex::new(Some(handoff_tx)),
            handoff_rx,
            counters: Arc::new(PoolCounters::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Arc::new(Mutex::new(HashMap::new())),
            worker_id_counter: AtomicUsize::new(0),
        })
    }

    /// Submit a job.
    ///
    /// The job is handed to an idle worker, or a new worker is spawned for it.
    /// This never blocks on the job itself.
    ///
    /// # Errors
    ///
    /// - `PoolError::Shutdown` if the pool has been shut down
    /// - `PoolError::Saturated` if `max_workers` workers are all busy
    /// - `PoolError::Spawn` if the OS refused a new thread
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }

        let job: Job = Box::pin(job);
        let job = {
            let handoff_tx = self.handoff_tx.lock();
            let Some(handoff_tx) = handoff_tx.as_ref() else {
                return Err(PoolError::Shutdown);
            };
            match handoff_tx.try_send(job) {
                Ok(()) => {
                    self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                    debug!("job handed to idle worker");
                    return Ok(());
                }
                Err(TrySendError::Full(job)) => job,
                Err(TrySendError::Disconnected(_)) => return Err(PoolError::Shutdown),
            }
        };

        self.spawn_worker(job)?;
        self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Whether `shutdown` was called or the pool was dropped.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shut down the pool gracefully with timeout.
    ///
    /// Idle workers exit immediately; busy workers finish their current job.
    /// Workers that don't exit within 2 seconds each are detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down worker pool");

        {
            let mut handoff_tx = self.handoff_tx.lock();
            *handoff_tx = None;
        }

        let workers: Vec<(usize, JoinHandle<()>)> = self.workers.lock().drain().collect();
        let worker_count = workers.len();

        for (worker_id, worker) in workers {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id, "Worker joined successfully"),
                Ok(false) => warn!(worker_id, "Worker panicked"),
                Err(_) => {
                    warn!(worker_id, "Worker did not exit within timeout - detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }

        info!(worker_count, "Worker pool shut down complete");
    }

    fn spawn_worker(&self, initial: Job) -> Result<(), PoolError> {
        let live = &self.counters.live_workers;
        let mut current = live.load(Ordering::Acquire);
        loop {
            if let Some(max_workers) = self.config.max_workers {
                if current >= max_workers {
                    warn!(max_workers, "Worker pool saturated");
                    return Err(PoolError::Saturated { max_workers });
                }
            }
            match live.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                live.fetch_sub(1, Ordering::AcqRel);
                error!(error = %e, "Failed to create worker runtime");
                return Err(PoolError::Spawn(e.to_string()));
            }
        };

        let worker_id = self.worker_id_counter.fetch_add(1, Ordering::Relaxed);
        let worker = Worker {
            worker_id,
            handoff_rx: self.handoff_rx.clone(),
            counters: Arc::clone(&self.counters),
            workers: Arc::clone(&self.workers),
            keep_alive: self.config.keep_alive(),
        };

        // Held across spawn so a fast-retiring worker cannot deregister before it is registered.
        let mut workers = self.workers.lock();
        let spawned = thread::Builder::new()
            .name(format!("{}-{worker_id}", self.config.thread_name_prefix))
            .stack_size(self.config.thread_stack_size)
            .spawn(move || worker.run(runtime, initial));

        match spawned {
            Ok(handle) => {
                workers.insert(worker_id, handle);
                self.counters.spawned_workers.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, "Spawned worker thread");
                Ok(())
            }
            Err(e) => {
                live.fetch_sub(1, Ordering::AcqRel);
                error!(worker_id, error = %e, "Failed to spawn worker thread");
                Err(PoolError::Spawn(e.to_string()))
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but DON'T join workers in Drop; a busy worker may
        // still be inside a long job.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut handoff_tx = self.handoff_tx.lock();
            *handoff_tx = None;
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

struct Worker {
    worker_id: usize,
    handoff_rx: Receiver<Job>,
    counters: Arc<PoolCounters>,
    workers: Arc<Mutex<HashMap<usize, JoinHandle<()>>>>,
    keep_alive: Duration,
}

impl Worker {
    fn run(self, runtime: tokio::runtime::Runtime, initial: Job) {
        let worker_id = self.worker_id;
        debug!(worker_id, "Worker thread started");

        let mut next = Some(initial);
        loop {
            let job = match next.take() {
                Some(job) => job,
                None => {
                    self.counters.idle_workers.fetch_add(1, Ordering::AcqRel);
                    let received = self.handoff_rx.recv_timeout(self.keep_alive);
                    self.counters.idle_workers.fetch_sub(1, Ordering::AcqRel);
                    match received {
                        Ok(job) => job,
                        Err(RecvTimeoutError::Timeout) => {
                            debug!(worker_id, "Idle worker retiring");
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!(worker_id, "Worker channel closed, exiting");
                            break;
                        }
                    }
                }
            };

            self.counters.active_jobs.fetch_add(1, Ordering::Relaxed);
            let outcome = runtime.block_on(AssertUnwindSafe(job).catch_unwind());
            self.counters.active_jobs.fetch_sub(1, Ordering::Relaxed);
            self.counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
            if outcome.is_err() {
                self.counters.panicked_jobs.fetch_add(1, Ordering::Relaxed);
                error!(worker_id, "Job panicked on worker");
            }
        }

        self.counters.live_workers.fetch_sub(1, Ordering::AcqRel);
        // Dropping our own handle detaches this thread; it is about to exit.
        drop(self.workers.lock().remove(&worker_id));
        debug!(worker_id, "Worker thread exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::mpsc;

    #[test]
    fn test_submit_runs_job() {
        let pool = WorkerPool::new(WorkerPoolConfig::new()).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        })
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("geohub-worker-"));
        pool.shutdown();
    }

    #[test]
    fn test_idle_worker_is_reused() {
        let pool = WorkerPool::new(WorkerPoolConfig::new()).unwrap();
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            pool.submit(async move { tx.send(()).unwrap() }).unwrap();
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
            // Give the worker time to park on the hand-off channel.
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while pool.stats().idle_workers == 0 && std::time::Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(pool.stats().spawned_workers, 1);
        assert_eq!(pool.stats().submitted_jobs, 3);
        pool.shutdown();
    }

    #[test]
    fn test_grows_for_concurrent_jobs() {
        let pool = WorkerPool::new(WorkerPoolConfig::new()).unwrap();
        let done = Arc::new(AtomicU64::new(0));
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        for _ in 0..4 {
            let release_rx = release_rx.clone();
            let done = Arc::clone(&done);
            pool.submit(async move {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(pool.stats().worker_count, 4);
        for _ in 0..4 {
            release_tx.send(()).unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_max_workers_saturates() {
        let pool = WorkerPool::new(WorkerPoolConfig::new().with_max_workers(1)).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        pool.submit(async move {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
        assert_eq!(
            pool.submit(async {}),
            Err(PoolError::Saturated { max_workers: 1 })
        );
        release_tx.send(()).unwrap();
        pool.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(WorkerPoolConfig::new()).unwrap();
        pool.submit(async { panic!("boom") }).unwrap();
        let (tx, rx) = mpsc::channel();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.stats().panicked_jobs == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        pool.submit(async move { tx.send(1).unwrap() }).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(pool.stats().panicked_jobs, 1);
        pool.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown() {
        let pool = WorkerPool::new(WorkerPoolConfig::new()).unwrap();
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.submit(async {}), Err(PoolError::Shutdown));
    }
}
