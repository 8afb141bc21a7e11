use crate::background::kernels::{run_encoded, JobDescriptor, JobFailure, JobResult};
use crate::core::config::WorkerPoolConfig;
use crate::grid::TileGridRecord;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("failed to start worker thread: {0}")]
    Spawn(String),

    #[error("failed to encode job: {0}")]
    Encode(String),

    #[error("failed to decode job result: {0}")]
    Decode(String),

    #[error("worker dropped job {0} without replying")]
    WorkerLost(u64),

    #[error(transparent)]
    Failed(#[from] JobFailure),
}

/// A queued job: encoded descriptor plus the channel its result goes back on
struct Envelope {
    id: u64,
    payload: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
}

/// Fixed set of worker threads running kernels off the orchestrating thread.
///
/// Each worker processes one job at a time; submissions beyond the number of
/// workers wait in the queue. Dropping the pool closes the queue and joins
/// the workers once they drain it.
pub struct WorkerPool {
    sender: Option<Sender<Envelope>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> Result<Self, PoolError> {
        let (sender, receiver) = unbounded::<Envelope>();
        let counters = Arc::new(PoolCounters::default());
        let count = config.workers.max(1);

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let receiver = receiver.clone();
            let counters = counters.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || Self::worker_loop(receiver, counters))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            workers.push(handle);
        }

        log::debug!("worker pool started with {} workers", count);

        Ok(Self {
            sender: Some(sender),
            workers,
            counters,
            next_id: AtomicU64::new(0),
        })
    }

    /// Queues a job; the returned handle resolves when a worker finishes it
    pub fn submit(&self, job: &JobDescriptor) -> Result<JobHandle, PoolError> {
        let sender = self.sender.as_ref().ok_or(PoolError::Closed)?;
        let payload = bincode::serialize(job).map_err(|e| PoolError::Encode(e.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(Envelope { id, payload, reply }).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Closed);
        }

        #[cfg(feature = "debug")]
        log::debug!("queued {} job {}", job.kernel.name(), id);

        Ok(JobHandle { id, receiver })
    }

    /// Jobs waiting for a free worker
    pub fn queued_jobs(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently being processed
    pub fn running_jobs(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    pub fn completed_jobs(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.is_none()
    }

    /// Stops accepting jobs and waits for the workers to drain the queue
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("worker thread panicked during shutdown");
            }
        }
        log::debug!("worker pool shut down");
    }

    fn worker_loop(receiver: Receiver<Envelope>, counters: Arc<PoolCounters>) {
        while let Ok(envelope) = receiver.recv() {
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            counters.running.fetch_add(1, Ordering::SeqCst);

            let started = instant::Instant::now();
            let result = run_encoded(&envelope.payload);
            log::info!(
                "job {} finished in {:?}",
                envelope.id,
                started.elapsed()
            );

            counters.running.fetch_sub(1, Ordering::SeqCst);
            counters.completed.fetch_add(1, Ordering::SeqCst);

            // The submitter may have stopped waiting; nothing to do then.
            let _ = envelope.reply.send(result);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pending result of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    receiver: oneshot::Receiver<Vec<u8>>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the worker's reply
    pub async fn wait(self) -> Result<TileGridRecord, PoolError> {
        let bytes = self
            .receiver
            .await
            .map_err(|_| PoolError::WorkerLost(self.id))?;
        let result: JobResult =
            bincode::deserialize(&bytes).map_err(|e| PoolError::Decode(e.to_string()))?;
        Ok(result?)
    }
}
