//! Standard action implementations of every job kind.

mod config_update;
mod image_prepull;
mod node_upgrade;

use std::sync::Arc;

use tracing::debug;

use crate::{
    EdgeTaskError, Result,
    config::EdgeConfig,
    edge::{ActionResponse, backend::ResourceProbe},
};

pub use config_update::config_update_runner;
pub use image_prepull::image_prepull_runner;
pub use node_upgrade::node_upgrade_runner;

const CHECK_ITEMS: [&str; 3] = ["cpu", "mem", "disk"];

/// Usage ceilings in percent enforced by the Check action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CheckLimits {
    cpu: f64,
    mem: f64,
    disk: f64,
}

impl From<&EdgeConfig> for CheckLimits {
    fn from(config: &EdgeConfig) -> Self {
        Self {
            cpu: config.cpu_limit,
            mem: config.mem_limit,
            disk: config.disk_limit,
        }
    }
}

/// Samples the host and compares each requested item against its ceiling.
/// No items means all of them.
pub(crate) async fn check_resources(
    probe: Arc<dyn ResourceProbe>,
    limits: CheckLimits,
    items: &[String],
) -> ActionResponse {
    let usage = match tokio::task::spawn_blocking(move || probe.usage()).await {
        Ok(Ok(usage)) => usage,
        Ok(Err(err)) => return ActionResponse::fail(err),
        Err(err) => return ActionResponse::fail(EdgeTaskError::Runtime(err.to_string())),
    };
    debug!(cpu = usage.cpu, mem = usage.mem, disk = usage.disk, "host usage sampled");

    let items: Vec<&str> = if items.is_empty() { CHECK_ITEMS.to_vec() } else { items.iter().map(|i| i.as_str()).collect() };
    for item in items {
        let (used, limit) = match item {
            "cpu" => (usage.cpu, limits.cpu),
            "mem" => (usage.mem, limits.mem),
            "disk" => (usage.disk, limits.disk),
            other => return ActionResponse::fail(format!("unknown check item {}", other)),
        };
        if used > limit {
            return ActionResponse::fail(format!("{} usage {:.1}% exceeds the limit of {:.1}%", item, used, limit));
        }
    }
    ActionResponse::next()
}

/// Maps an installer outcome to a response that moves on to the next action.
pub(crate) fn proceed(result: Result<()>) -> ActionResponse {
    match result {
        Ok(()) => ActionResponse::next(),
        Err(err) => ActionResponse::fail(err),
    }
}
