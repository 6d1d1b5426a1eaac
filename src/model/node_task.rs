use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    EdgeTaskError, Result,
    model::{image_prepull::ImageStatus, job::JobKind},
    utils,
};

/// Phase of one node's slice of a job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display)]
pub enum NodeTaskPhase {
    #[default]
    Pending,
    InProgress,
    Successful,
    Failure,
}

impl NodeTaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeTaskPhase::Successful | NodeTaskPhase::Failure)
    }

    /// Whether `next` is a legal successor: Pending→InProgress, Pending→Failure,
    /// InProgress→Successful, InProgress→Failure, or staying put.
    pub fn can_transition_to(
        &self,
        next: NodeTaskPhase,
    ) -> bool {
        use NodeTaskPhase::*;

        *self == next || matches!((self, next), (Pending, InProgress) | (Pending, Failure) | (InProgress, Successful) | (InProgress, Failure))
    }
}

/// Outcome flag of one executed action.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display)]
pub enum ConditionStatus {
    True,
    False,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { ConditionStatus::True } else { ConditionStatus::False }
    }
}

/// One entry of a node-task's append-only action history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    pub action: String,
    pub status: ConditionStatus,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionStatus {
    pub fn new(
        action: &str,
        succ: bool,
        reason: Option<String>,
    ) -> Self {
        Self {
            action: action.to_string(),
            status: succ.into(),
            time: utils::time::now(),
            reason: reason.filter(|r| !r.is_empty()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTaskStatus<X> {
    pub node_name: String,
    #[serde(default)]
    pub phase: NodeTaskPhase,
    /// Action the next edge report refers to; empty means the flow's first action.
    #[serde(default)]
    pub current_action: String,
    #[serde(default)]
    pub action_flow: Vec<ActionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extend: X,
}

impl<X: Default> NodeTaskStatus<X> {
    pub fn pending(node_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            phase: NodeTaskPhase::Pending,
            current_action: String::new(),
            action_flow: Vec::new(),
            reason: None,
            time: None,
            extend: X::default(),
        }
    }
}

impl<X> NodeTaskStatus<X> {
    /// Whether the report that ends this node-task has been applied. A terminal
    /// task waits on the report of its `current_action`; a task failed before
    /// dispatch never gets one.
    pub fn is_completed(&self) -> bool {
        self.phase.is_terminal() && (self.action_flow.is_empty() || self.action_flow.iter().any(|a| a.action == self.current_action))
    }
}

/// Parsed form of the `extend` field of an upstream report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum NodeTaskExtend {
    /// Per-image pull outcomes of an image pre-pull job.
    Images(Vec<ImageStatus>),
    /// Version pair of a node upgrade.
    Versions {
        from: String,
        to: String,
    },
}

impl NodeTaskExtend {
    /// Parses a raw `extend` string for `kind`. An empty string carries nothing.
    pub fn parse(
        kind: JobKind,
        raw: &str,
    ) -> Result<Option<Self>> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match kind {
            JobKind::ImagePrePull => {
                let images: Vec<ImageStatus> =
                    serde_json::from_str(raw).map_err(|e| EdgeTaskError::Convert(format!("invalid image status list '{}': {}", raw, e)))?;
                Ok(Some(NodeTaskExtend::Images(images)))
            }
            JobKind::NodeUpgrade => {
                let (from, to) = raw.split_once(',').ok_or_else(|| EdgeTaskError::Convert(format!("invalid version pair '{}'", raw)))?;
                Ok(Some(NodeTaskExtend::Versions {
                    from: from.trim().to_string(),
                    to: to.trim().to_string(),
                }))
            }
            JobKind::ConfigUpdate => Ok(None),
        }
    }

    /// Renders the wire form accepted by [`NodeTaskExtend::parse`].
    pub fn encode(&self) -> Result<String> {
        match self {
            NodeTaskExtend::Images(images) => Ok(serde_json::to_string(images)?),
            NodeTaskExtend::Versions {
                from,
                to,
            } => Ok(format!("{},{}", from, to)),
        }
    }
}

/// A status change for one node-task, as applied by the status updater.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTaskUpdate {
    pub node_name: String,
    pub phase: NodeTaskPhase,
    pub reason: Option<String>,
    pub current_action: Option<String>,
    pub action_status: Option<ActionStatus>,
    pub extend: Option<NodeTaskExtend>,
}

impl NodeTaskUpdate {
    pub fn new(
        node_name: &str,
        phase: NodeTaskPhase,
    ) -> Self {
        Self {
            node_name: node_name.to_string(),
            phase,
            reason: None,
            current_action: None,
            action_status: None,
            extend: None,
        }
    }
}
