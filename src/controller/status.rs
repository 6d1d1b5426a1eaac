//! Per-kind single-writer status reducer.
//!
//! Every status write for a kind goes through one queue drained by one task,
//! so two writes for the same job never race each other. Each write re-reads
//! the job, applies the change and stores it with an optimistic update; a lost
//! race or an unavailable store is retried with the configured fixed delay;
//! anything else fails the write at once.

use std::{collections::HashMap, sync::Arc};

use strum::IntoEnumIterator;
use tokio::{runtime::Handle, sync::oneshot};
use tracing::{debug, error};

use crate::{
    EdgeTaskError, Result,
    common::{Queue, Shutdown},
    config::StatusConfig,
    model::{JobKind, JobPhase, NodeTaskUpdate},
    store::JobStore,
    utils,
    wrapper::NodeTaskWrapper,
};

/// Invoked once with the outcome of the write. `Ok(true)` means this write is
/// the one that completed the node-task.
pub type StatusCallback = Box<dyn FnOnce(Result<bool>) + Send>;

/// One node-task status change submitted to a [`StatusUpdater`].
pub struct UpdateStatusOptions {
    pub job_name: String,
    pub update: NodeTaskUpdate,
    pub callback: Option<StatusCallback>,
}

impl UpdateStatusOptions {
    pub fn new(
        job_name: &str,
        update: NodeTaskUpdate,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            update,
            callback: None,
        }
    }

    pub fn from_task(task: &NodeTaskWrapper) -> Self {
        Self::new(task.job_name(), task.to_update())
    }

    pub fn with_callback(
        mut self,
        callback: impl FnOnce(Result<bool>) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

enum StatusWrite {
    NodeTask(UpdateStatusOptions),
    JobPhase {
        job_name: String,
        phase: JobPhase,
        reply: oneshot::Sender<Result<()>>,
    },
}

pub struct StatusUpdater {
    kind: JobKind,
    store: Arc<dyn JobStore>,
    queue: Arc<Queue<StatusWrite>>,
    config: StatusConfig,
}

impl StatusUpdater {
    pub fn new(
        kind: JobKind,
        store: Arc<dyn JobStore>,
        config: &StatusConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            store,
            queue: Queue::new(config.queue_size),
            config: config.clone(),
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Enqueues a node-task change; waits only while the queue is full.
    pub async fn update_status(
        &self,
        opts: UpdateStatusOptions,
    ) -> Result<()> {
        self.queue.send_async(StatusWrite::NodeTask(opts)).await
    }

    /// Enqueues a node-task change and waits until the write was attempted.
    /// Returns whether this write completed the node-task.
    pub async fn update_and_wait(
        &self,
        opts: UpdateStatusOptions,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.update_status(opts.with_callback(move |result| {
            let _ = tx.send(result);
        }))
        .await?;
        rx.await.map_err(|_| EdgeTaskError::Cancelled("status update".to_string()))?
    }

    /// Advances the job phase, never moving it backwards, and waits for the write.
    pub async fn set_job_phase(
        &self,
        job_name: &str,
        phase: JobPhase,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send_async(StatusWrite::JobPhase {
                job_name: job_name.to_string(),
                phase,
                reply: tx,
            })
            .await?;
        rx.await.map_err(|_| EdgeTaskError::Cancelled("job phase update".to_string()))?
    }

    /// Starts the consumer loop on `runtime`.
    pub fn start(
        self: &Arc<Self>,
        runtime: &Handle,
        shutdown: &Shutdown,
    ) {
        let updater = self.clone();
        let shutdown = shutdown.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    write = updater.queue.next_async() => match write {
                        Some(write) => updater.handle(write).await,
                        None => break,
                    }
                }
            }
            debug!(kind = %updater.kind, "status updater stopped");
        });
    }

    async fn handle(
        &self,
        write: StatusWrite,
    ) {
        match write {
            StatusWrite::NodeTask(opts) => {
                let result = self.write_node_task(&opts.job_name, &opts.update).await;
                if let Err(err) = &result {
                    error!(kind = %self.kind, job = %opts.job_name, node = %opts.update.node_name, error = %err, "failed to update node task status");
                }
                if let Some(callback) = opts.callback {
                    callback(result);
                }
            }
            StatusWrite::JobPhase {
                job_name,
                phase,
                reply,
            } => {
                let result = self.write_job_phase(&job_name, phase).await;
                if let Err(err) = &result {
                    error!(kind = %self.kind, job = %job_name, phase = %phase, error = %err, "failed to update job phase");
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn write_node_task(
        &self,
        job_name: &str,
        update: &NodeTaskUpdate,
    ) -> Result<bool> {
        utils::retry_if(self.config.retry_times, self.config.retry_interval(), EdgeTaskError::is_transient, move |_| async move {
            let mut job = self.store.get(self.kind, job_name).await?;
            let completed = job.apply_update(update)?;
            self.store.update_status(&job).await?;
            Ok(completed)
        })
        .await
    }

    async fn write_job_phase(
        &self,
        job_name: &str,
        phase: JobPhase,
    ) -> Result<()> {
        utils::retry_if(self.config.retry_times, self.config.retry_interval(), EdgeTaskError::is_transient, move |_| async move {
            let mut job = self.store.get(self.kind, job_name).await?;
            if job.phase().rank() >= phase.rank() {
                return Ok(());
            }
            job.set_phase(phase);
            self.store.update_status(&job).await?;
            Ok(())
        })
        .await
    }
}

/// Status updaters of every supported kind.
pub struct StatusUpdaters {
    updaters: HashMap<JobKind, Arc<StatusUpdater>>,
}

impl StatusUpdaters {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: &StatusConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            updaters: JobKind::iter().map(|kind| (kind, StatusUpdater::new(kind, store.clone(), config))).collect(),
        })
    }

    pub fn get(
        &self,
        kind: JobKind,
    ) -> Result<Arc<StatusUpdater>> {
        self.updaters.get(&kind).cloned().ok_or_else(|| EdgeTaskError::UnknownKind(kind.to_string()))
    }

    pub fn start(
        &self,
        runtime: &Handle,
        shutdown: &Shutdown,
    ) {
        for updater in self.updaters.values() {
            updater.start(runtime, shutdown);
        }
    }
}
