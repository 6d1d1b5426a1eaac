use serde::{Deserialize, Serialize};

use crate::{
    Result,
    model::{
        ConfigUpdateJob, ImagePrePullJob, NodeUpgradeJob,
        job::{JobKind, JobPhase, ObjectMeta},
        node_task::NodeTaskUpdate,
    },
};

/// Runs `$body` with `$job` bound to the concrete job inside an [`AnyJob`].
macro_rules! with_job {
    ($any:expr, $job:ident => $body:expr) => {
        match $any {
            AnyJob::ImagePrePull($job) => $body,
            AnyJob::NodeUpgrade($job) => $body,
            AnyJob::ConfigUpdate($job) => $body,
        }
    };
}

pub(crate) use with_job;

/// A job resource of any supported kind, tagged by `kind` on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind")]
pub enum AnyJob {
    #[serde(rename = "imageprepulljob")]
    ImagePrePull(ImagePrePullJob),
    #[serde(rename = "nodeupgradejob")]
    NodeUpgrade(NodeUpgradeJob),
    #[serde(rename = "configupdatejob")]
    ConfigUpdate(ConfigUpdateJob),
}

impl AnyJob {
    pub fn kind(&self) -> JobKind {
        with_job!(self, job => job.kind())
    }

    pub fn name(&self) -> &str {
        with_job!(self, job => job.name())
    }

    pub fn metadata(&self) -> &ObjectMeta {
        with_job!(self, job => &job.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        with_job!(self, job => &mut job.metadata)
    }

    pub fn resource_version(&self) -> u64 {
        self.metadata().resource_version
    }

    pub fn phase(&self) -> JobPhase {
        with_job!(self, job => job.status.phase)
    }

    pub fn set_phase(
        &mut self,
        phase: JobPhase,
    ) {
        with_job!(self, job => job.status.phase = phase)
    }

    pub fn concurrency(&self) -> u32 {
        use crate::model::KindSpec;

        with_job!(self, job => job.spec.concurrency())
    }

    /// Serialized spec, the body of every downstream message for this job.
    pub fn spec_bytes(&self) -> Result<Vec<u8>> {
        Ok(with_job!(self, job => serde_json::to_vec(&job.spec)?))
    }

    pub fn validate(&self) -> Result<()> {
        with_job!(self, job => job.validate())
    }

    pub fn apply_update(
        &mut self,
        update: &NodeTaskUpdate,
    ) -> Result<bool> {
        with_job!(self, job => job.apply_update(update))
    }

    /// Node names in stored order.
    pub fn node_names(&self) -> Vec<String> {
        with_job!(self, job => job.status.node_status.iter().map(|t| t.node_name.clone()).collect())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

impl From<ImagePrePullJob> for AnyJob {
    fn from(job: ImagePrePullJob) -> Self {
        AnyJob::ImagePrePull(job)
    }
}

impl From<NodeUpgradeJob> for AnyJob {
    fn from(job: NodeUpgradeJob) -> Self {
        AnyJob::NodeUpgrade(job)
    }
}

impl From<ConfigUpdateJob> for AnyJob {
    fn from(job: ConfigUpdateJob) -> Self {
        AnyJob::ConfigUpdate(job)
    }
}

#[cfg(test)]
mod test {
    use super::AnyJob;
    use crate::model::{ConfigUpdateJob, ConfigUpdateSpec, JobKind, JobPhase, NodeUpgradeJob, NodeUpgradeSpec};

    #[test]
    fn test_tagged_json() {
        let mut job: AnyJob = NodeUpgradeJob::new("j4", NodeUpgradeSpec::new("v1.19.0", 1), &["n5"]).into();
        job.metadata_mut().creation_timestamp = None;
        let text = job.to_json().unwrap();
        assert!(text.contains(r#""kind":"nodeupgradejob""#));

        let back = AnyJob::from_json(&text).unwrap();
        assert_eq!(back.kind(), JobKind::NodeUpgrade);
        assert_eq!(back, job);
    }

    #[test]
    fn test_phase_and_nodes() {
        let mut job: AnyJob = ConfigUpdateJob::new("c1", ConfigUpdateSpec::new(&[("modules.edged.maxPods", "200")], 3), &["a", "b"]).into();
        assert_eq!(job.phase(), JobPhase::Init);
        job.set_phase(JobPhase::InProgress);
        assert_eq!(job.phase(), JobPhase::InProgress);
        assert_eq!(job.concurrency(), 3);
        assert_eq!(job.node_names(), vec!["a".to_string(), "b".to_string()]);

        let spec: serde_json::Value = serde_json::from_slice(&job.spec_bytes().unwrap()).unwrap();
        assert_eq!(spec["overrides"]["modules.edged.maxPods"], "200");
    }
}
