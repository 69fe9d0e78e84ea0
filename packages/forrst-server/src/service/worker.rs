//! Background worker for periodic and on-demand tasks.
//!
//! `BackgroundWorker<R>` feeds tasks from an mpsc channel to a
//! [`BackgroundRunnable`] and calls it on a fixed tick. [`OperationSweeper`]
//! is the runnable that deletes expired async operation records.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::operation::record::now_millis;
use crate::operation::AsyncOperationManager;

/// Capacity of the task channel of every worker.
const TASK_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler driven by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Process a single submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a spawned worker loop.
///
/// The loop runs until [`stop`](Self::stop) is called or every sender is
/// dropped, then calls [`BackgroundRunnable::shutdown`].
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker loop. The first tick fires one full `tick_interval`
    /// after start, not immediately.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticker.tick() => runnable.on_tick().await,
                    _ = &mut shutdown_rx => break,
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Queues a task for the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stops the worker and waits for its loop to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// OperationSweeper
// ---------------------------------------------------------------------------

/// Tasks accepted by the [`OperationSweeper`].
#[derive(Debug)]
pub enum SweepTask {
    /// Sweep now instead of waiting for the next tick. The number of deleted
    /// records is sent back when `reply` is set.
    RunNow {
        reply: Option<oneshot::Sender<usize>>,
    },
}

/// Deletes expired operation records, at most `batch_size` per pass.
pub struct OperationSweeper {
    manager: Arc<AsyncOperationManager>,
    batch_size: usize,
    total_deleted: u64,
}

impl OperationSweeper {
    #[must_use]
    pub fn new(manager: Arc<AsyncOperationManager>, batch_size: usize) -> Self {
        Self {
            manager,
            batch_size,
            total_deleted: 0,
        }
    }

    async fn sweep(&mut self) -> usize {
        match self.manager.delete_expired(now_millis(), self.batch_size).await {
            Ok(deleted) => {
                self.total_deleted += deleted as u64;
                deleted
            }
            Err(err) => {
                warn!(error = %err, "operation sweep failed");
                0
            }
        }
    }
}

#[async_trait]
impl BackgroundRunnable for OperationSweeper {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::RunNow { reply } => {
                let deleted = self.sweep().await;
                if let Some(reply) = reply {
                    let _ = reply.send(deleted);
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        self.sweep().await;
    }

    async fn shutdown(&mut self) {
        debug!(total_deleted = self.total_deleted, "operation sweeper stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
