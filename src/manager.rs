//! Task manager - the cloud-side entry point of edgetask.
//!
//! The manager owns the pieces that turn stored jobs into edge work:
//! - one downstream dispatcher and one status updater per job kind
//! - the upstream reducer folding edge reports into node-task status
//! - the executor registry shared by both directions
//! - the optional firewall reconciler

#[cfg(test)]
mod test;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use strum::IntoEnumIterator;
use tokio::runtime::{Handle, Runtime};
use tracing::info;

use crate::{
    Config, EdgeTaskError, Result,
    common::Shutdown,
    controller::{DownstreamController, StatusUpdaters, UpstreamController},
    executor::ExecutorRegistry,
    model::{AnyJob, JobKind, NodeTaskPhase},
    reconciler::IptablesReconciler,
    store::JobStore,
    transport::{MessageLayer, SessionRegistry},
    wire::{Message, NodeTaskResource},
    wrapper::JobWrapper,
};

/// The cloud-side node-task manager.
///
/// # Example
///
/// ```rust,ignore
/// let hub = LocalHub::new();
/// let manager = TaskManagerBuilder::new().hub(&hub).build()?;
/// manager.launch();
///
/// manager.create_job(ImagePrePullJob::new("j1", spec, &["n1", "n2"]).into()).await?;
///
/// manager.shutdown();
/// ```
pub struct TaskManager {
    config: Config,
    store: Arc<dyn JobStore>,
    layer: Arc<dyn MessageLayer>,
    registry: Arc<ExecutorRegistry>,
    updaters: Arc<StatusUpdaters>,
    downstream: Vec<Arc<DownstreamController>>,
    upstream: Arc<UpstreamController>,
    reconciler: Option<Arc<IptablesReconciler>>,

    running: AtomicBool,
    shutdown: Shutdown,
    handle: Handle,
    /// Set when the manager built its own runtime.
    _runtime: Option<Arc<Runtime>>,
}

impl TaskManager {
    pub(crate) fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        layer: Arc<dyn MessageLayer>,
        sessions: Arc<dyn SessionRegistry>,
        reconciler: Option<Arc<IptablesReconciler>>,
        handle: Handle,
        runtime: Option<Arc<Runtime>>,
    ) -> Result<Self> {
        let registry = ExecutorRegistry::new();
        let updaters = StatusUpdaters::new(store.clone(), &config.status);
        let downstream = JobKind::iter()
            .map(|kind| {
                Ok(DownstreamController::new(
                    updaters.get(kind)?,
                    store.clone(),
                    registry.clone(),
                    layer.clone(),
                    sessions.clone(),
                    config.controller.job_queue_size,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let upstream = UpstreamController::new(layer.clone(), registry.clone(), updaters.clone());

        Ok(Self {
            config,
            store,
            layer,
            registry,
            updaters,
            downstream,
            upstream,
            reconciler,
            running: AtomicBool::new(false),
            shutdown: Shutdown::new(),
            handle,
            _runtime: runtime,
        })
    }

    /// Starts every loop. Calling it twice is a no-op.
    pub fn launch(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        // Writers first so the dispatchers never queue into a stopped updater.
        self.updaters.start(&self.handle, &self.shutdown);
        self.upstream.start(&self.handle, &self.shutdown);
        for controller in self.downstream.iter() {
            controller.start(&self.handle, &self.shutdown);
        }
        if let Some(reconciler) = &self.reconciler {
            reconciler.start(&self.handle, &self.shutdown);
        }
        info!(kinds = self.downstream.len(), reconciler = self.reconciler.is_some(), "task manager launched");
    }

    /// Stops every loop and cancels running executors at their next task boundary.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        self.shutdown.shutdown();
        info!("task manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ExecutorRegistry> {
        self.registry.clone()
    }

    pub async fn create_job(
        &self,
        job: AnyJob,
    ) -> Result<AnyJob> {
        job.validate()?;
        self.store.create(job).await
    }

    pub async fn get_job(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<AnyJob> {
        self.store.get(kind, name).await
    }

    /// Deletes a job; a running executor is interrupted by the dispatcher.
    pub async fn delete_job(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<bool> {
        self.store.delete(kind, name).await
    }

    /// Resumes a paused node-task by re-sending its stored current action.
    pub async fn confirm(
        &self,
        kind: JobKind,
        job_name: &str,
        node_name: &str,
    ) -> Result<()> {
        let job = JobWrapper::new(self.store.get(kind, job_name).await?);
        let task = job
            .tasks()
            .into_iter()
            .find(|t| t.node_name() == node_name)
            .ok_or_else(|| EdgeTaskError::NotFound(format!("node task {} in {}/{}", node_name, kind, job_name)))?;
        if task.phase() != NodeTaskPhase::InProgress {
            return Err(EdgeTaskError::Runtime(format!("node task {} in {}/{} is {}, nothing to confirm", node_name, kind, job_name, task.phase())));
        }
        let action = task.action()?;

        let resource = NodeTaskResource::new(kind, job_name, node_name);
        info!(kind = %kind, job = job_name, node = node_name, action = action.name(), "confirming node task");
        let msg = Message::downstream(&resource, action.name(), job.spec()?);
        self.layer.send(msg).await.map_err(|e| EdgeTaskError::Send(e.to_string()))
    }
}
