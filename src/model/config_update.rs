use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::model::{
    job::{Job, JobKind, KindExtend, KindSpec},
    node_task::NodeTaskExtend,
};

pub type ConfigUpdateJob = Job<ConfigUpdateSpec, ConfigUpdateNodeExtend>;

fn default_concurrency() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdateSpec {
    /// dotted config keys and their new values
    pub overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub check_items: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl ConfigUpdateSpec {
    pub fn new(
        overrides: &[(&str, &str)],
        concurrency: u32,
    ) -> Self {
        Self {
            overrides: overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            check_items: Vec::new(),
            concurrency,
        }
    }
}

impl KindSpec for ConfigUpdateSpec {
    const KIND: JobKind = JobKind::ConfigUpdate;

    fn concurrency(&self) -> u32 {
        self.concurrency
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["overrides"],
            "properties": {
                "overrides": {
                    "type": "object",
                    "minProperties": 1,
                    "additionalProperties": { "type": "string" }
                },
                "checkItems": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["cpu", "mem", "disk"] }
                },
                "concurrency": { "type": "integer", "minimum": 1 }
            }
        })
    }
}

/// Config updates report no per-node extras.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdateNodeExtend {}

impl KindExtend for ConfigUpdateNodeExtend {
    fn apply(
        &mut self,
        _: &NodeTaskExtend,
    ) {
    }
}
