use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::info;

use super::request::GenerationRequest;
use super::runner::JobRunner;

#[derive(Debug, Error)]
#[error("job queue is closed")]
pub struct QueueClosed(pub GenerationRequest);

/// Sending half of the in-process job queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<GenerationRequest>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<GenerationRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Waits for queue space. Hands the request back if no worker loop is running.
    pub async fn submit(&self, request: GenerationRequest) -> Result<(), QueueClosed> {
        self.tx
            .send(request)
            .await
            .map_err(|rejected| QueueClosed(rejected.0))
    }
}

/// Dequeues requests and runs up to `concurrency` of them at once.
pub fn spawn_workers(
    runner: JobRunner,
    mut rx: mpsc::Receiver<GenerationRequest>,
    concurrency: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    info!("Starting job workers (concurrency: {})", concurrency.max(1));

    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let runner = runner.clone();
            tokio::spawn(async move {
                runner.run(request).await;
                drop(permit);
            });
        }
        info!("Job queue closed, worker loop exiting");
    })
}
