use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::model::{
    job::{Job, JobKind, KindExtend, KindSpec},
    node_task::NodeTaskExtend,
};

pub type NodeUpgradeJob = Job<NodeUpgradeSpec, NodeUpgradeNodeExtend>;

fn default_concurrency() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpgradeSpec {
    /// target edge version, e.g. `v1.19.0`
    pub version: String,
    /// installer image to fetch the target release from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub check_items: Vec<String>,
    /// pause at WaitConfirm until the node owner confirms
    #[serde(default)]
    pub require_confirmation: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl NodeUpgradeSpec {
    pub fn new(
        version: &str,
        concurrency: u32,
    ) -> Self {
        Self {
            version: version.to_string(),
            image: None,
            check_items: Vec::new(),
            require_confirmation: false,
            concurrency,
        }
    }
}

impl KindSpec for NodeUpgradeSpec {
    const KIND: JobKind = JobKind::NodeUpgrade;

    fn concurrency(&self) -> u32 {
        self.concurrency
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["version"],
            "properties": {
                "version": { "type": "string", "pattern": "^v?[0-9]+\\.[0-9]+\\.[0-9]+" },
                "image": { "type": ["string", "null"] },
                "checkItems": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["cpu", "mem", "disk"] }
                },
                "requireConfirmation": { "type": "boolean" },
                "concurrency": { "type": "integer", "minimum": 1 }
            }
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpgradeNodeExtend {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_version: String,
}

impl KindExtend for NodeUpgradeNodeExtend {
    fn apply(
        &mut self,
        extend: &NodeTaskExtend,
    ) {
        if let NodeTaskExtend::Versions {
            from,
            to,
        } = extend
        {
            self.from_version = from.clone();
            self.to_version = to.clone();
        }
    }
}
