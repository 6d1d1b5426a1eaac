//! Kind-agnostic views over jobs and their node-tasks.
//!
//! The executor, the downstream dispatcher and the upstream reducer only see
//! these wrappers. Mutating a wrapper never touches the store; the status
//! updater turns the in-memory change into a persisted one.

use std::sync::Arc;

use crate::{
    EdgeTaskError, Result,
    flow::{Action, ActionFlow},
    model::{ActionStatus, AnyJob, JobKind, NodeTaskExtend, NodeTaskPhase, NodeTaskUpdate, with_job},
    wire::UpstreamMessage,
};

/// Read-only handle on a job snapshot.
#[derive(Debug, Clone)]
pub struct JobWrapper {
    job: Arc<AnyJob>,
}

impl JobWrapper {
    pub fn new(job: AnyJob) -> Self {
        Self {
            job: Arc::new(job),
        }
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn kind(&self) -> JobKind {
        self.job.kind()
    }

    pub fn concurrency(&self) -> u32 {
        self.job.concurrency()
    }

    /// Body of every downstream message sent for this job.
    pub fn spec(&self) -> Result<Vec<u8>> {
        self.job.spec_bytes()
    }

    pub fn flow(&self) -> &'static ActionFlow {
        ActionFlow::for_kind(self.kind())
    }

    /// One wrapper per node-task, in stored order.
    pub fn tasks(&self) -> Vec<NodeTaskWrapper> {
        let kind = self.kind();
        let job_name = self.name().to_string();
        with_job!(self.job.as_ref(), job => job
            .status
            .node_status
            .iter()
            .map(|t| NodeTaskWrapper {
                kind,
                job_name: job_name.clone(),
                node_name: t.node_name.clone(),
                phase: t.phase,
                reason: t.reason.clone(),
                current_action: t.current_action.clone(),
                action_status: None,
                extend: None,
            })
            .collect())
    }

    pub fn get_object(&self) -> &AnyJob {
        &self.job
    }
}

/// In-memory view of one node-task plus the change pending for it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTaskWrapper {
    kind: JobKind,
    job_name: String,
    node_name: String,
    phase: NodeTaskPhase,
    reason: Option<String>,
    current_action: String,
    action_status: Option<ActionStatus>,
    extend: Option<NodeTaskExtend>,
}

impl NodeTaskWrapper {
    /// Builds the view an upstream report describes.
    ///
    /// The phase is InProgress on success and Failure otherwise; the reported
    /// action becomes the current one and its outcome is queued for the audit
    /// trail.
    pub fn from_report(
        kind: JobKind,
        job_name: &str,
        node_name: &str,
        report: &UpstreamMessage,
    ) -> Result<Self> {
        let extend = NodeTaskExtend::parse(kind, &report.extend)?;
        let mut task = Self {
            kind,
            job_name: job_name.to_string(),
            node_name: node_name.to_string(),
            phase: NodeTaskPhase::InProgress,
            reason: None,
            current_action: report.action.clone(),
            action_status: Some(ActionStatus::new(&report.action, report.succ, report.reason())),
            extend,
        };
        if !report.succ {
            task.set_phase(NodeTaskPhase::Failure, report.reason());
        }
        Ok(task)
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn phase(&self) -> NodeTaskPhase {
        self.phase
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Only pending node-tasks are dispatched.
    pub fn can_execute(&self) -> bool {
        self.phase == NodeTaskPhase::Pending
    }

    /// Sets the phase; a `None` reason keeps the previous one.
    pub fn set_phase(
        &mut self,
        phase: NodeTaskPhase,
        reason: Option<String>,
    ) {
        self.phase = phase;
        if reason.is_some() {
            self.reason = reason;
        }
    }

    pub fn current_action(&self) -> &str {
        &self.current_action
    }

    pub fn set_current_action(
        &mut self,
        action: &str,
    ) {
        self.current_action = action.to_string();
    }

    /// The stored action, or the flow's first one when nothing is stored yet.
    pub fn action(&self) -> Result<Action<'static>> {
        ActionFlow::for_kind(self.kind).resolve(&self.current_action).ok_or_else(|| EdgeTaskError::UnknownAction {
            kind: self.kind.to_string(),
            action: self.current_action.clone(),
        })
    }

    pub fn extend(&self) -> Option<&NodeTaskExtend> {
        self.extend.as_ref()
    }

    /// The change the status updater writes for this node-task.
    pub fn to_update(&self) -> NodeTaskUpdate {
        NodeTaskUpdate {
            node_name: self.node_name.clone(),
            phase: self.phase,
            reason: self.reason.clone(),
            current_action: if self.current_action.is_empty() { None } else { Some(self.current_action.clone()) },
            action_status: self.action_status.clone(),
            extend: self.extend.clone(),
        }
    }
}
