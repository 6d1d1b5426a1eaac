use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    utils,
    wire::{EDGE_MODULE, GROUP_TASK_MANAGER, NodeTaskResource, OPERATION_UPDATE_NODE_ACTION_STATUS, TASK_MANAGER_MODULE},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    /// creation time in milliseconds
    pub timestamp: i64,
    /// whether the sender waits for a response
    #[serde(default)]
    pub sync: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageRouter {
    pub source: String,
    pub group: String,
    pub resource: String,
    pub operation: String,
}

/// Envelope carried by the message layer in both directions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub router: MessageRouter,
    pub content: Vec<u8>,
}

impl Message {
    pub fn new(
        source: &str,
        group: &str,
        resource: &str,
        operation: &str,
        content: Vec<u8>,
    ) -> Self {
        Self {
            header: MessageHeader {
                id: Uuid::new_v4().to_string(),
                parent_id: String::new(),
                timestamp: utils::time::time_millis(),
                sync: false,
            },
            router: MessageRouter {
                source: source.to_string(),
                group: group.to_string(),
                resource: resource.to_string(),
                operation: operation.to_string(),
            },
            content,
        }
    }

    /// A cloud → edge message asking `resource`'s node to run `action`.
    pub fn downstream(
        resource: &NodeTaskResource,
        action: &str,
        spec: Vec<u8>,
    ) -> Self {
        Self::new(TASK_MANAGER_MODULE, GROUP_TASK_MANAGER, &resource.to_string(), action, spec)
    }

    /// An edge → cloud action report.
    pub fn upstream(
        resource: &NodeTaskResource,
        body: Vec<u8>,
    ) -> Self {
        Self::new(EDGE_MODULE, GROUP_TASK_MANAGER, &resource.to_string(), OPERATION_UPDATE_NODE_ACTION_STATUS, body)
    }

    /// Marks this message as a response to `parent`.
    pub fn reply_to(
        mut self,
        parent: &Message,
    ) -> Self {
        self.header.parent_id = parent.header.id.clone();
        self
    }

    pub fn resource(&self) -> &str {
        &self.router.resource
    }

    pub fn operation(&self) -> &str {
        &self.router.operation
    }
}
