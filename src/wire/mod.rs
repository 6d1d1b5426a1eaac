//! Wire contract shared by the cloud controllers and the edge runner.

mod message;
mod resource;
mod upstream;

pub use message::{Message, MessageHeader, MessageRouter};
pub use resource::{API_VERSION, NodeTaskResource, is_node_task_resource, is_valid_name};
pub use upstream::UpstreamMessage;

/// Source and group of messages emitted by the cloud task manager.
pub const TASK_MANAGER_MODULE: &str = "taskmanager";
pub const GROUP_TASK_MANAGER: &str = "taskmanager";

/// Source of messages emitted by the edge runner.
pub const EDGE_MODULE: &str = "edged";

/// Operation of every edge → cloud action report.
pub const OPERATION_UPDATE_NODE_ACTION_STATUS: &str = "UpdateNodeActionStatus";
