use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    EdgeTaskError, Result,
    model::node_task::{NodeTaskExtend, NodeTaskPhase, NodeTaskStatus, NodeTaskUpdate},
    utils,
    wire::is_valid_name,
};

/// Job kinds served by the task manager.
///
/// The serialized form doubles as the resource type segment of node-task
/// resource strings.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::AsRefStr, strum::EnumString, strum::EnumIter, strum::Display,
)]
pub enum JobKind {
    #[serde(rename = "imageprepulljob")]
    #[strum(serialize = "imageprepulljob")]
    ImagePrePull,
    #[serde(rename = "nodeupgradejob")]
    #[strum(serialize = "nodeupgradejob")]
    NodeUpgrade,
    #[serde(rename = "configupdatejob")]
    #[strum(serialize = "configupdatejob")]
    ConfigUpdate,
}

/// Coarse phase of a job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display)]
pub enum JobPhase {
    #[default]
    Init,
    InProgress,
    Successful,
    Failed,
}

impl JobPhase {
    /// Position along Init → InProgress → {Successful, Failed}.
    pub fn rank(&self) -> u8 {
        match self {
            JobPhase::Init => 0,
            JobPhase::InProgress => 1,
            JobPhase::Successful | JobPhase::Failed => 2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    /// Bumped by the store on every write; updates carrying a stale value conflict.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus<X> {
    #[serde(default)]
    pub phase: JobPhase,
    #[serde(default)]
    pub node_status: Vec<NodeTaskStatus<X>>,
}

impl<X> Default for JobStatus<X> {
    fn default() -> Self {
        Self {
            phase: JobPhase::Init,
            node_status: Vec::new(),
        }
    }
}

/// Kind-specific job payload.
pub trait KindSpec: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    const KIND: JobKind;

    /// Maximum number of nodes executing at the same time.
    fn concurrency(&self) -> u32;

    /// JSON schema the edge validates a received spec against.
    fn schema() -> serde_json::Value;
}

/// Kind-specific per-node status fields, filled from upstream `extend` payloads.
pub trait KindExtend: Serialize + DeserializeOwned + Clone + Default + PartialEq + Send + Sync + 'static {
    fn apply(
        &mut self,
        extend: &NodeTaskExtend,
    );
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job<S, X> {
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(default)]
    pub status: JobStatus<X>,
}

impl<S, X> Job<S, X>
where
    S: KindSpec,
    X: KindExtend,
{
    /// Creates a job in phase Init with one Pending node-task per node.
    pub fn new(
        name: &str,
        spec: S,
        nodes: &[&str],
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                resource_version: 0,
                creation_timestamp: Some(utils::time::now()),
            },
            spec,
            status: JobStatus {
                phase: JobPhase::Init,
                node_status: nodes.iter().map(|n| NodeTaskStatus::pending(n)).collect(),
            },
        }
    }

    pub fn kind(&self) -> JobKind {
        S::KIND
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Checks the structural invariants of a job resource.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_name(&self.metadata.name) {
            return Err(EdgeTaskError::Convert(format!("{}: invalid job name '{}'", S::KIND, self.metadata.name)));
        }
        if self.spec.concurrency() < 1 {
            return Err(EdgeTaskError::Convert(format!("{}/{}: concurrency must be at least 1", S::KIND, self.metadata.name)));
        }
        let mut seen = HashSet::new();
        for task in self.status.node_status.iter() {
            if !is_valid_name(&task.node_name) || !seen.insert(task.node_name.as_str()) {
                return Err(EdgeTaskError::Convert(format!(
                    "{}/{}: node '{}' is not a valid name or is listed twice",
                    S::KIND,
                    self.metadata.name,
                    task.node_name
                )));
            }
        }
        Ok(())
    }

    pub fn node_task(
        &self,
        node_name: &str,
    ) -> Option<&NodeTaskStatus<X>> {
        self.status.node_status.iter().find(|t| t.node_name == node_name)
    }

    /// Applies one node-task status change to the in-memory job.
    ///
    /// Phase changes outside the node-task lifecycle are ignored. Returns true
    /// only for the update that completed the node-task, so a redelivered
    /// final report is told apart from the first one.
    pub fn apply_update(
        &mut self,
        update: &NodeTaskUpdate,
    ) -> Result<bool> {
        let job_name = self.metadata.name.clone();
        let task = self
            .status
            .node_status
            .iter_mut()
            .find(|t| t.node_name == update.node_name)
            .ok_or_else(|| EdgeTaskError::NotFound(format!("node task {} in {}/{}", update.node_name, S::KIND, job_name)))?;
        let was_completed = task.is_completed();

        if let Some(action_status) = &update.action_status {
            task.action_flow.push(action_status.clone());
        }
        // A late or duplicated update never moves a node-task backwards; only its
        // audit entry is kept.
        if !task.phase.can_transition_to(update.phase) {
            return Ok(!was_completed && task.is_completed());
        }
        if update.phase == NodeTaskPhase::InProgress && task.phase != NodeTaskPhase::InProgress {
            task.time = Some(utils::time::now());
        }
        task.phase = update.phase;
        if let Some(reason) = &update.reason {
            task.reason = Some(reason.clone());
        }
        if let Some(action) = &update.current_action {
            task.current_action = action.clone();
        }
        if let Some(extend) = &update.extend {
            task.extend.apply(extend);
        }
        let completed = !was_completed && task.is_completed();
        self.settle_phase();
        Ok(completed)
    }

    /// Ends a running job once every node-task is terminal: Successful when
    /// all of them succeeded, Failed otherwise.
    fn settle_phase(&mut self) {
        if self.status.phase != JobPhase::InProgress || !self.status.node_status.iter().all(|t| t.phase.is_terminal()) {
            return;
        }
        let all_succeeded = self.status.node_status.iter().all(|t| t.phase == NodeTaskPhase::Successful);
        self.status.phase = if all_succeeded { JobPhase::Successful } else { JobPhase::Failed };
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::{JobKind, JobPhase};
    use crate::wire::NodeTaskResource;
    use crate::model::{ActionStatus, ImagePrePullJob, ImagePrePullSpec, NodeTaskPhase, NodeTaskUpdate, NodeUpgradeJob, NodeUpgradeSpec};

    #[test]
    fn test_kind_names() {
        assert_eq!(JobKind::ImagePrePull.as_ref(), "imageprepulljob");
        assert_eq!(JobKind::from_str("nodeupgradejob").unwrap(), JobKind::NodeUpgrade);
        assert!(JobKind::from_str("podjob").is_err());
        assert_eq!(serde_json::to_string(&JobKind::ConfigUpdate).unwrap(), "\"configupdatejob\"");
    }

    #[test]
    fn test_validate_rejects_duplicate_nodes() {
        let job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n1", "n1"]);
        assert!(job.validate().is_err());

        let job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 0), &["n1"]);
        assert!(job.validate().is_err());

        let job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 2), &["n1", "n2"]);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_validate_matches_resource_grammar() {
        let job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["Edge_Node1"]);
        assert!(job.validate().is_err());
        assert!(NodeTaskResource::parse(&NodeTaskResource::new(JobKind::ImagePrePull, "j1", "Edge_Node1").to_string()).is_err());

        let job = ImagePrePullJob::new("Upgrade_1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n1"]);
        assert!(job.validate().is_err());

        let job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["edge-node-1.zone-a"]);
        assert!(job.validate().is_ok());
        let resource = NodeTaskResource::new(JobKind::ImagePrePull, "j1", "edge-node-1.zone-a");
        assert_eq!(NodeTaskResource::parse(&resource.to_string()).unwrap(), resource);
    }

    #[test]
    fn test_apply_update_unknown_node() {
        let mut job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n1"]);
        let update = NodeTaskUpdate::new("n9", NodeTaskPhase::InProgress);
        assert!(job.apply_update(&update).is_err());
    }

    #[test]
    fn test_apply_update_stamps_time_on_in_progress() {
        let mut job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n1"]);
        job.apply_update(&NodeTaskUpdate::new("n1", NodeTaskPhase::InProgress)).unwrap();
        let first = job.node_task("n1").unwrap().time;
        assert!(first.is_some());

        job.apply_update(&NodeTaskUpdate::new("n1", NodeTaskPhase::InProgress)).unwrap();
        assert_eq!(job.node_task("n1").unwrap().time, first);
    }

    #[test]
    fn test_apply_update_never_regresses() {
        let mut job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n1"]);
        job.apply_update(&NodeTaskUpdate::new("n1", NodeTaskPhase::InProgress)).unwrap();
        let mut done = NodeTaskUpdate::new("n1", NodeTaskPhase::Successful);
        done.current_action = Some("Pull".to_string());
        done.action_status = Some(ActionStatus::new("Pull", true, None));
        job.apply_update(&done).unwrap();

        let mut late = NodeTaskUpdate::new("n1", NodeTaskPhase::InProgress);
        late.current_action = Some("Check".to_string());
        late.action_status = Some(ActionStatus::new("Check", true, None));
        job.apply_update(&late).unwrap();

        let task = job.node_task("n1").unwrap();
        assert_eq!(task.phase, NodeTaskPhase::Successful);
        assert_eq!(task.current_action, "Pull");
        assert_eq!(task.action_flow.len(), 2);
    }

    #[test]
    fn test_job_phase_settles_when_all_tasks_end() {
        let mut job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 2), &["n1", "n2"]);
        job.status.phase = JobPhase::InProgress;
        job.apply_update(&NodeTaskUpdate::new("n1", NodeTaskPhase::InProgress)).unwrap();
        job.apply_update(&NodeTaskUpdate::new("n1", NodeTaskPhase::Successful)).unwrap();
        assert_eq!(job.status.phase, JobPhase::InProgress);

        job.apply_update(&NodeTaskUpdate::new("n2", NodeTaskPhase::Failure)).unwrap();
        assert_eq!(job.status.phase, JobPhase::Failed);
    }

    fn report(
        node: &str,
        phase: NodeTaskPhase,
        current: &str,
        action: &str,
        succ: bool,
    ) -> NodeTaskUpdate {
        let mut update = NodeTaskUpdate::new(node, phase);
        update.current_action = Some(current.to_string());
        update.action_status = Some(ActionStatus::new(action, succ, None));
        update
    }

    #[test]
    fn test_completion_is_reported_once() {
        let mut job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n1"]);
        assert!(!job.apply_update(&NodeTaskUpdate::new("n1", NodeTaskPhase::InProgress)).unwrap());
        assert!(!job.apply_update(&report("n1", NodeTaskPhase::InProgress, "Pull", "Check", true)).unwrap());

        let done = report("n1", NodeTaskPhase::Successful, "Pull", "Pull", true);
        assert!(job.apply_update(&done).unwrap());
        assert!(!job.apply_update(&done).unwrap());
        assert_eq!(job.node_task("n1").unwrap().action_flow.len(), 3);
    }

    #[test]
    fn test_failure_completes_after_rollback() {
        let mut job = NodeUpgradeJob::new("j4", NodeUpgradeSpec::new("v1.19.0", 1), &["n5"]);
        job.apply_update(&NodeTaskUpdate::new("n5", NodeTaskPhase::InProgress)).unwrap();

        let upgrade = report("n5", NodeTaskPhase::Failure, "Rollback", "Upgrade", false);
        assert!(!job.apply_update(&upgrade).unwrap());

        let rollback = report("n5", NodeTaskPhase::Failure, "Rollback", "Rollback", true);
        assert!(job.apply_update(&rollback).unwrap());
        assert!(!job.apply_update(&upgrade).unwrap());
        assert!(!job.apply_update(&rollback).unwrap());
    }
}
