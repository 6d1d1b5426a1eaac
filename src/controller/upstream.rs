//! Upstream reducer: folds edge action reports into node-task status.

use std::{sync::Arc, time::Duration};

use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::{
    Result,
    common::Shutdown,
    controller::status::{StatusUpdaters, UpdateStatusOptions},
    executor::ExecutorRegistry,
    model::NodeTaskPhase,
    transport::MessageLayer,
    wire::{Message, NodeTaskResource, UpstreamMessage, is_node_task_resource},
    wrapper::NodeTaskWrapper,
};

const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

pub struct UpstreamController {
    layer: Arc<dyn MessageLayer>,
    registry: Arc<ExecutorRegistry>,
    updaters: Arc<StatusUpdaters>,
}

impl UpstreamController {
    pub fn new(
        layer: Arc<dyn MessageLayer>,
        registry: Arc<ExecutorRegistry>,
        updaters: Arc<StatusUpdaters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            layer,
            registry,
            updaters,
        })
    }

    /// Starts the receive loop on `runtime`.
    pub fn start(
        self: &Arc<Self>,
        runtime: &Handle,
        shutdown: &Shutdown,
    ) {
        let controller = self.clone();
        let shutdown = shutdown.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    msg = controller.layer.receive() => match msg {
                        Ok(msg) => {
                            if let Err(err) = controller.handle(msg).await {
                                warn!(error = %err, "dropping upstream message");
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to receive upstream message");
                            tokio::time::sleep(RECEIVE_BACKOFF).await;
                        }
                    }
                }
            }
            debug!("upstream controller stopped");
        });
    }

    /// Reduces one report. Returns once the status write has been attempted.
    pub async fn handle(
        &self,
        msg: Message,
    ) -> Result<()> {
        if !is_node_task_resource(msg.resource()) {
            trace!(resource = msg.resource(), "ignoring non node-task message");
            return Ok(());
        }
        let resource = NodeTaskResource::parse(msg.resource())?;
        let report = UpstreamMessage::decode(&msg.content)?;
        let updater = self.updaters.get(resource.kind)?;

        let mut task = NodeTaskWrapper::from_report(resource.kind, &resource.job_name, &resource.node_name, &report)?;
        let action = task.action()?;
        debug!(
            kind = %resource.kind,
            job = %resource.job_name,
            node = %resource.node_name,
            action = action.name(),
            succ = report.succ,
            "action reported"
        );

        if action.ends_with(report.succ) {
            if action.is_failure_branch() {
                task.set_phase(NodeTaskPhase::Failure, None);
            } else if task.phase() == NodeTaskPhase::InProgress {
                task.set_phase(NodeTaskPhase::Successful, None);
            }
        } else if let Some(next) = action.next(report.succ) {
            task.set_current_action(next.name());
        }

        // Only the write that completes the node-task gives its permit back; a
        // redelivered final report must not free a permit held by another node.
        if !updater.update_and_wait(UpdateStatusOptions::from_task(&task)).await? {
            return Ok(());
        }
        match self.registry.get(resource.kind, &resource.job_name) {
            Ok(executor) => executor.finish_task(),
            Err(err) => warn!(job = %resource.job_name, node = %resource.node_name, error = %err, "completion for an abandoned job"),
        }
        Ok(())
    }
}
