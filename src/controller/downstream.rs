//! Per-kind downstream dispatcher: turns new jobs into running executors.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{runtime::Handle, sync::broadcast::error::RecvError};
use tracing::{debug, error, info, warn};

use crate::{
    Result,
    common::{Queue, Shutdown},
    controller::status::{StatusUpdater, UpdateStatusOptions},
    executor::{ExecutorRegistry, StatusUpdateFn},
    model::{JobKind, JobPhase},
    store::{JobStore, ResourceEvent},
    transport::{MessageLayer, SessionRegistry},
    wrapper::{JobWrapper, NodeTaskWrapper},
};

/// Watches one job kind and executes every job still in phase Init.
pub struct DownstreamController {
    kind: JobKind,
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    layer: Arc<dyn MessageLayer>,
    sessions: Arc<dyn SessionRegistry>,
    updater: Arc<StatusUpdater>,
    queue: Arc<Queue<JobWrapper>>,
}

impl DownstreamController {
    pub fn new(
        updater: Arc<StatusUpdater>,
        store: Arc<dyn JobStore>,
        registry: Arc<ExecutorRegistry>,
        layer: Arc<dyn MessageLayer>,
        sessions: Arc<dyn SessionRegistry>,
        queue_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind: updater.kind(),
            store,
            registry,
            layer,
            sessions,
            updater,
            queue: Queue::new(queue_size),
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Starts the watcher and the job consumer on `runtime`.
    pub fn start(
        self: &Arc<Self>,
        runtime: &Handle,
        shutdown: &Shutdown,
    ) {
        let watcher = self.clone();
        let ctx = shutdown.clone();
        runtime.spawn(async move { watcher.watch(ctx).await });

        let consumer = self.clone();
        let ctx = shutdown.clone();
        let handle = runtime.clone();
        runtime.spawn(async move { consumer.consume(handle, ctx).await });
    }

    async fn watch(
        &self,
        shutdown: Shutdown,
    ) {
        // Subscribe before listing so no event between the two is lost.
        let mut events = self.store.watch();
        self.resync().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = events.recv() => match event {
                    Ok(event) if event.kind() == self.kind => self.handle_event(event).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(kind = %self.kind, missed, "job watcher lagged, resyncing");
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        debug!(kind = %self.kind, "job watcher stopped");
    }

    async fn resync(&self) {
        match self.store.list(self.kind).await {
            Ok(jobs) => {
                for job in jobs {
                    self.enqueue(job.name()).await;
                }
            }
            Err(err) => error!(kind = %self.kind, error = %err, "failed to list jobs"),
        }
    }

    async fn handle_event(
        &self,
        event: ResourceEvent,
    ) {
        match event {
            ResourceEvent::Added(job) | ResourceEvent::Updated(job) => self.enqueue(job.name()).await,
            ResourceEvent::Deleted {
                kind,
                name,
            } => {
                if let Ok(executor) = self.registry.get(kind, &name) {
                    executor.interrupt();
                    self.registry.remove(kind, &name);
                    info!(kind = %kind, job = %name, "job deleted, executor interrupted");
                }
            }
        }
    }

    /// Queues the canonical copy of `name` if it has not started yet.
    async fn enqueue(
        &self,
        name: &str,
    ) {
        let job = match self.store.get(self.kind, name).await {
            Ok(job) => job,
            Err(err) => {
                debug!(kind = %self.kind, job = name, error = %err, "job vanished before dispatch");
                return;
            }
        };
        if job.phase() != JobPhase::Init {
            return;
        }
        if let Err(err) = self.queue.send_async(JobWrapper::new(job)).await {
            error!(kind = %self.kind, job = name, error = %err, "failed to queue job");
        }
    }

    async fn consume(
        &self,
        runtime: Handle,
        shutdown: Shutdown,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                job = self.queue.next_async() => match job {
                    Some(job) => {
                        if let Err(err) = self.dispatch(job, &runtime, &shutdown).await {
                            error!(kind = %self.kind, error = %err, "failed to dispatch job");
                        }
                    }
                    None => break,
                }
            }
        }
        debug!(kind = %self.kind, "job consumer stopped");
    }

    async fn dispatch(
        &self,
        job: JobWrapper,
        runtime: &Handle,
        shutdown: &Shutdown,
    ) -> Result<()> {
        // The same job may have been queued more than once; only the copy that
        // still reads Init in the store gets an executor.
        let current = self.store.get(self.kind, job.name()).await?;
        if current.phase() != JobPhase::Init {
            debug!(kind = %self.kind, job = job.name(), "job already started");
            return Ok(());
        }
        let job = JobWrapper::new(current);

        let (executor, present) = self.registry.get_or_create(job, self.layer.clone(), self.status_update_fn());
        if present {
            info!(kind = %self.kind, job = executor.name(), "job is already executing, skipping");
            return Ok(());
        }
        if let Err(err) = self.updater.set_job_phase(executor.name(), JobPhase::InProgress).await {
            self.registry.remove_if_same(&executor);
            return Err(err);
        }

        let connected = self.sessions.connected_nodes();
        let ctx = shutdown.clone();
        runtime.spawn(async move { executor.execute(&ctx, &connected).await });
        Ok(())
    }

    fn status_update_fn(&self) -> StatusUpdateFn {
        let updater = self.updater.clone();
        Arc::new(move |task: NodeTaskWrapper| {
            let updater = updater.clone();
            async move {
                if let Err(err) = updater.update_and_wait(UpdateStatusOptions::from_task(&task)).await {
                    error!(job = task.job_name(), node = task.node_name(), error = %err, "failed to persist dispatch status");
                }
            }
            .boxed()
        })
    }
}
