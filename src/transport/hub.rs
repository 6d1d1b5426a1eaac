//! In-process message layer connecting the cloud task manager with edge runners.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use tracing::trace;

use crate::{
    EdgeTaskError, Result, ShareLock,
    common::Queue,
    transport::{MessageLayer, SessionRegistry},
    wire::{Message, NodeTaskResource},
};

const LINK_CAPACITY: usize = 1024;

/// Routes downstream messages by the node named in their resource string
/// and funnels every edge report into one upstream queue.
#[derive(Clone)]
pub struct LocalHub {
    upstream: Arc<Queue<Message>>,
    edges: ShareLock<HashMap<String, Arc<Queue<Message>>>>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            upstream: Queue::new(LINK_CAPACITY),
            edges: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The cloud end: sends downstream, receives upstream.
    pub fn cloud_link(&self) -> Arc<dyn MessageLayer> {
        Arc::new(CloudLink {
            hub: self.clone(),
        })
    }

    /// Registers `node` as connected and returns its end of the hub.
    pub fn connect(
        &self,
        node: &str,
    ) -> EdgeLink {
        let inbox = self.edges.write().unwrap().entry(node.to_string()).or_insert_with(|| Queue::new(LINK_CAPACITY)).clone();
        trace!(node, "edge connected");
        EdgeLink {
            node: node.to_string(),
            inbox,
            upstream: self.upstream.clone(),
        }
    }

    pub fn disconnect(
        &self,
        node: &str,
    ) {
        self.edges.write().unwrap().remove(node);
        trace!(node, "edge disconnected");
    }
}

impl SessionRegistry for LocalHub {
    fn connected_nodes(&self) -> HashSet<String> {
        self.edges.read().unwrap().keys().cloned().collect()
    }
}

struct CloudLink {
    hub: LocalHub,
}

#[async_trait]
impl MessageLayer for CloudLink {
    async fn send(
        &self,
        msg: Message,
    ) -> Result<()> {
        let resource = NodeTaskResource::parse(msg.resource())?;
        let inbox = self
            .hub
            .edges
            .read()
            .unwrap()
            .get(&resource.node_name)
            .cloned()
            .ok_or_else(|| EdgeTaskError::Transport(format!("no session for node {}", resource.node_name)))?;
        inbox.send_async(msg).await
    }

    async fn receive(&self) -> Result<Message> {
        self.hub.upstream.next_async().await.ok_or_else(|| EdgeTaskError::Transport("upstream link closed".to_string()))
    }
}

/// The edge end of a [`LocalHub`]: receives downstream, sends upstream.
#[derive(Clone)]
pub struct EdgeLink {
    node: String,
    inbox: Arc<Queue<Message>>,
    upstream: Arc<Queue<Message>>,
}

impl EdgeLink {
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Downstream messages waiting to be handled.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

#[async_trait]
impl MessageLayer for EdgeLink {
    async fn send(
        &self,
        msg: Message,
    ) -> Result<()> {
        self.upstream.send_async(msg).await
    }

    async fn receive(&self) -> Result<Message> {
        self.inbox.next_async().await.ok_or_else(|| EdgeTaskError::Transport(format!("downstream link of {} closed", self.node)))
    }
}

#[cfg(test)]
mod test {
    use super::LocalHub;
    use crate::{
        transport::{MessageLayer, SessionRegistry},
        wire::{EDGE_MODULE, GROUP_TASK_MANAGER, Message, TASK_MANAGER_MODULE},
    };

    fn message(node: &str) -> Message {
        Message::new(
            TASK_MANAGER_MODULE,
            GROUP_TASK_MANAGER,
            &format!("operations/v1alpha2/imageprepulljob/j1/node/{}", node),
            "Check",
            b"{}".to_vec(),
        )
    }

    #[tokio::test]
    async fn test_route_by_node() {
        let hub = LocalHub::new();
        let cloud = hub.cloud_link();
        let n1 = hub.connect("n1");
        let n2 = hub.connect("n2");
        assert_eq!(hub.connected_nodes().len(), 2);

        cloud.send(message("n2")).await.unwrap();
        assert_eq!(n1.pending(), 0);
        assert_eq!(n2.pending(), 1);
        let msg = n2.receive().await.unwrap();
        assert_eq!(msg.operation(), "Check");

        let report = Message::new(EDGE_MODULE, GROUP_TASK_MANAGER, msg.resource(), "UpdateNodeActionStatus", Vec::new());
        n2.send(report.clone()).await.unwrap();
        assert_eq!(cloud.receive().await.unwrap(), report);
    }

    #[tokio::test]
    async fn test_send_to_disconnected_node() {
        let hub = LocalHub::new();
        let cloud = hub.cloud_link();
        hub.connect("n1");
        hub.disconnect("n1");
        assert!(hub.connected_nodes().is_empty());
        assert!(cloud.send(message("n1")).await.is_err());
        assert!(cloud.send(Message::new(TASK_MANAGER_MODULE, GROUP_TASK_MANAGER, "bad/resource", "Check", Vec::new())).await.is_err());
    }
}
