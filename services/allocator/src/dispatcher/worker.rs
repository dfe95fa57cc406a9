//! Request worker pool.
//!
//! A fixed number of tokio tasks pull jobs from one bounded queue and hand
//! them to the dispatcher, one job per worker at a time.

use std::sync::Arc;

use hostalloc_messages::{Message, Reply, RequestEnvelope};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use super::{AllocationDispatcher, ReplyTo};

/// A queued request and where its reply goes.
pub struct Job {
    pub envelope: RequestEnvelope,
    pub reply_to: ReplyTo,
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("allocator is shutting down")]
    Closed,

    #[error("allocator dropped the request without replying")]
    NoReply,
}

/// Client side of the worker pool. Cheap to clone.
#[derive(Clone)]
pub struct AllocatorHandle {
    tx: mpsc::Sender<Job>,
}

impl AllocatorHandle {
    /// Enqueues a message and waits for its reply.
    pub async fn request(&self, message: Message) -> Result<Reply, HandleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job {
                envelope: RequestEnvelope::new(message),
                reply_to: Some(reply_tx),
            })
            .await
            .map_err(|_| HandleError::Closed)?;
        reply_rx.await.map_err(|_| HandleError::NoReply)
    }

    /// Enqueues a fire-and-forget message.
    pub async fn send(&self, message: Message) -> Result<(), HandleError> {
        self.tx
            .send(Job {
                envelope: RequestEnvelope::new(message),
                reply_to: None,
            })
            .await
            .map_err(|_| HandleError::Closed)
    }
}

pub struct RequestWorkerPool {
    dispatcher: AllocationDispatcher,
    worker_count: usize,
    queue_depth: usize,
}

impl RequestWorkerPool {
    pub fn new(dispatcher: AllocationDispatcher, worker_count: usize, queue_depth: usize) -> Self {
        Self {
            dispatcher,
            worker_count: worker_count.max(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Spawns the workers. The returned task finishes once every worker has
    /// stopped, either on shutdown or when all handles are dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> (AllocatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        info!(
            workers = self.worker_count,
            queue_depth = self.queue_depth,
            "Starting allocator workers"
        );

        let workers: Vec<JoinHandle<()>> = (0..self.worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    self.dispatcher.clone(),
                    rx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        let supervisor = tokio::spawn(async move {
            for worker in workers {
                let _ = worker.await;
            }
            info!("Allocator workers stopped");
        });

        (AllocatorHandle { tx }, supervisor)
    }
}

#[instrument(skip(dispatcher, rx, shutdown))]
async fn run_worker(
    worker_id: usize,
    dispatcher: AllocationDispatcher,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            job = async { rx.lock().await.recv().await } => job,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Worker shutting down");
                    break;
                }
                continue;
            }
        };

        match job {
            Some(Job { envelope, reply_to }) => dispatcher.dispatch(envelope, reply_to).await,
            None => {
                debug!("Request queue closed");
                break;
            }
        }
    }
}
