//! Persisted job resources.
//!
//! Every job kind shares the same shape, [`Job<S, X>`]: object metadata, a
//! kind-specific spec `S`, and a status whose per-node entries carry
//! kind-specific extras `X`. [`AnyJob`] is the tagged union the store and the
//! controllers pass around.

mod any;
mod config_update;
mod image_prepull;
mod job;
mod node_task;
mod node_upgrade;

pub use any::AnyJob;
pub(crate) use any::with_job;
pub use config_update::{ConfigUpdateJob, ConfigUpdateNodeExtend, ConfigUpdateSpec};
pub use image_prepull::{ImagePrePullJob, ImagePrePullNodeExtend, ImagePrePullSpec, ImageStatus};
pub use job::{Job, JobKind, JobPhase, JobStatus, KindExtend, KindSpec, ObjectMeta};
pub use node_task::{ActionStatus, ConditionStatus, NodeTaskExtend, NodeTaskPhase, NodeTaskStatus, NodeTaskUpdate};
pub use node_upgrade::{NodeUpgradeJob, NodeUpgradeNodeExtend, NodeUpgradeSpec};
