//! Edge side of the node-task protocol.
//!
//! [`EdgeTaskManager`] receives downstream messages for its node, hands each
//! to the runner of the job kind and lets the runner walk the flow, reporting
//! every action through the [`Reporter`].

mod actions;
pub mod backend;
mod reporter;
mod runner;

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::{
    EdgeTaskError, Result,
    common::Shutdown,
    config::EdgeConfig,
    model::JobKind,
    transport::MessageLayer,
    wire::{Message, NodeTaskResource, is_node_task_resource},
};

pub use actions::{config_update_runner, image_prepull_runner, node_upgrade_runner};
pub use backend::EdgeBackends;
pub use reporter::Reporter;
pub use runner::{ActionContext, ActionFn, ActionResponse, ActionRunner, Runner, SpecSerializer};

const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

pub struct EdgeTaskManager {
    node_name: String,
    layer: Arc<dyn MessageLayer>,
    runners: HashMap<JobKind, Arc<dyn Runner>>,
    shutdown: Shutdown,
}

impl EdgeTaskManager {
    /// A manager running the standard actions of every kind on `backends`.
    pub fn new(
        node_name: &str,
        layer: Arc<dyn MessageLayer>,
        backends: &EdgeBackends,
        config: &EdgeConfig,
    ) -> Result<Arc<Self>> {
        let reporter = Reporter::new(layer.clone());
        let runners: Vec<Arc<dyn Runner>> = vec![
            Arc::new(image_prepull_runner(reporter.clone(), backends, config)?),
            Arc::new(node_upgrade_runner(reporter.clone(), backends, config)?),
            Arc::new(config_update_runner(reporter, backends, config)?),
        ];
        Ok(Self::with_runners(node_name, layer, runners))
    }

    pub fn with_runners(
        node_name: &str,
        layer: Arc<dyn MessageLayer>,
        runners: Vec<Arc<dyn Runner>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_name: node_name.to_string(),
            layer,
            runners: runners.into_iter().map(|r| (r.kind(), r)).collect(),
            shutdown: Shutdown::new(),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Starts the receive loop on `runtime`. Every accepted message runs on its own task.
    pub fn start(
        self: &Arc<Self>,
        runtime: &Handle,
    ) {
        let manager = self.clone();
        let spawner = runtime.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.shutdown.wait() => break,
                    msg = manager.layer.receive() => match msg {
                        Ok(msg) => {
                            if let Err(err) = manager.handle(&spawner, msg) {
                                warn!(node = %manager.node_name, error = %err, "dropping downstream message");
                            }
                        }
                        Err(err) => {
                            warn!(node = %manager.node_name, error = %err, "failed to receive downstream message");
                            tokio::time::sleep(RECEIVE_BACKOFF).await;
                        }
                    }
                }
            }
            debug!(node = %manager.node_name, "edge task manager stopped");
        });
        info!(node = %self.node_name, runners = self.runners.len(), "edge task manager started");
    }

    /// Stops the receive loop; flows stop before their next action.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    fn handle(
        &self,
        runtime: &Handle,
        msg: Message,
    ) -> Result<()> {
        if !is_node_task_resource(msg.resource()) {
            return Err(EdgeTaskError::MalformedResource(msg.resource().to_string()));
        }
        let resource = NodeTaskResource::parse(msg.resource())?;
        if resource.node_name != self.node_name {
            return Err(EdgeTaskError::Transport(format!("message for node {} delivered to {}", resource.node_name, self.node_name)));
        }
        let runner = self.runners.get(&resource.kind).cloned().ok_or_else(|| EdgeTaskError::UnknownKind(resource.kind.to_string()))?;

        debug!(kind = %resource.kind, job = %resource.job_name, action = msg.operation(), "running action");
        let shutdown = self.shutdown.clone();
        let Message {
            router,
            content,
            ..
        } = msg;
        runtime.spawn(async move {
            runner.run_action(&shutdown, &resource.job_name, &resource.node_name, &router.operation, &content).await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::runtime::Handle;

    use super::EdgeTaskManager;
    use crate::{
        EdgeTaskError,
        config::EdgeConfig,
        edge::backend::fake::{FakeImages, FakeInstaller, backends, idle},
        flow::consts,
        model::{ImagePrePullSpec, JobKind},
        transport::{LocalHub, MessageLayer},
        wire::{Message, NodeTaskResource, UpstreamMessage},
    };

    #[tokio::test]
    async fn test_runs_downstream_actions() {
        let hub = LocalHub::new();
        let images = Arc::new(FakeImages::default());
        let backends = backends(idle(), images.clone(), Arc::new(FakeInstaller::new("v1.18.0")));
        let manager = EdgeTaskManager::new("n1", Arc::new(hub.connect("n1")), &backends, &EdgeConfig::default()).unwrap();
        manager.start(&Handle::current());

        let cloud = hub.cloud_link();
        let spec = serde_json::to_vec(&ImagePrePullSpec::new(&["nginx:latest"], 1)).unwrap();
        cloud.send(Message::downstream(&NodeTaskResource::new(JobKind::ImagePrePull, "j1", "n1"), consts::CHECK, spec)).await.unwrap();

        let mut actions = Vec::new();
        while actions.len() < 2 {
            let msg = tokio::time::timeout(Duration::from_secs(2), cloud.receive()).await.unwrap().unwrap();
            assert_eq!(msg.resource(), "operations/v1alpha2/imageprepulljob/j1/node/n1");
            actions.push(UpstreamMessage::decode(&msg.content).unwrap().action);
        }
        assert_eq!(actions, vec![consts::CHECK, consts::PULL]);
        assert_eq!(images.pulled.lock().unwrap().len(), 1);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_drops_foreign_messages() {
        let hub = LocalHub::new();
        let backends = backends(idle(), Arc::new(FakeImages::default()), Arc::new(FakeInstaller::new("v1.18.0")));
        let manager = EdgeTaskManager::new("n1", Arc::new(hub.connect("n1")), &backends, &EdgeConfig::default()).unwrap();
        let runtime = Handle::current();

        let foreign = Message::downstream(&NodeTaskResource::new(JobKind::ImagePrePull, "j1", "n2"), consts::CHECK, Vec::new());
        assert!(manager.handle(&runtime, foreign).is_err());
        let other = Message::new("edged", "meta", "default/pod/nginx", "update", Vec::new());
        assert_eq!(manager.handle(&runtime, other), Err(EdgeTaskError::MalformedResource("default/pod/nginx".to_string())));
    }
}
