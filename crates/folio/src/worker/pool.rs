use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::job::{JobHandler, JobQueue, PageJob, PageJobResult};

/// Fixed set of worker threads fed by a bounded channel. `submit` blocks
/// once `queue_capacity` jobs are waiting, which is the backpressure the
/// orchestrator relies on.
pub struct WorkerPool {
    job_sender: Sender<PageJob>,
    result_receiver: Receiver<PageJobResult>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let capacity = queue_capacity.max(1);
        let (job_sender, job_receiver) = bounded::<PageJob>(capacity);
        let (result_sender, result_receiver) = bounded::<PageJobResult>(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("folio-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, result_tx, shutdown_flag, worker_handler);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers (queue capacity {})", worker_count, capacity);

        Ok(Self {
            job_sender,
            result_receiver,
            workers: Mutex::new(workers),
            shutdown,
            worker_count,
        })
    }

    pub fn submit(&self, job: PageJob) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// A handle on the result stream. Closes once every worker has exited.
    pub fn results(&self) -> Receiver<PageJobResult> {
        self.result_receiver.clone()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<PageJobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stops workers after their current job. Queued jobs are dropped; their
    /// pages stay `pending` and are picked up by startup recovery.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(&self) {
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => {
                error!("Worker handle list poisoned");
                return;
            }
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

impl JobQueue for WorkerPool {
    fn enqueue(&self, job: PageJob) -> Result<(), WorkerError> {
        self.submit(job)
    }

    fn pending(&self) -> usize {
        self.job_sender.len()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<PageJob>,
    result_sender: Sender<PageJobResult>,
    shutdown: Arc<AtomicBool>,
    handler: Arc<dyn JobHandler>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                debug!(
                    "Worker {} processing page {} of {}",
                    worker_id, job.page_number, job.document_hash
                );

                let result = handler.handle(job);

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
