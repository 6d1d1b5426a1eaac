use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::model::{
    job::{Job, JobKind, KindExtend, KindSpec},
    node_task::{ConditionStatus, NodeTaskExtend},
};

pub type ImagePrePullJob = Job<ImagePrePullSpec, ImagePrePullNodeExtend>;

fn default_concurrency() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrePullSpec {
    /// images to pull on every node
    pub images: Vec<String>,
    /// reference to a docker-config secret, `namespace/name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_secret: Option<String>,
    /// pre-flight checks run by the Check action: cpu, mem, disk
    #[serde(default)]
    pub check_items: Vec<String>,
    /// extra pull attempts per image
    #[serde(default)]
    pub retry_times: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl ImagePrePullSpec {
    pub fn new(
        images: &[&str],
        concurrency: u32,
    ) -> Self {
        Self {
            images: images.iter().map(|i| i.to_string()).collect(),
            image_secret: None,
            check_items: Vec::new(),
            retry_times: 0,
            concurrency,
        }
    }
}

impl KindSpec for ImagePrePullSpec {
    const KIND: JobKind = JobKind::ImagePrePull;

    fn concurrency(&self) -> u32 {
        self.concurrency
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["images"],
            "properties": {
                "images": {
                    "type": "array",
                    "minItems": 1,
                    "items": { "type": "string", "minLength": 1 }
                },
                "imageSecret": { "type": ["string", "null"] },
                "checkItems": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["cpu", "mem", "disk"] }
                },
                "retryTimes": { "type": "integer", "minimum": 0 },
                "concurrency": { "type": "integer", "minimum": 1 }
            }
        })
    }
}

/// Pull outcome of one image on one node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    pub image: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ImageStatus {
    pub fn new(
        image: &str,
        succ: bool,
        reason: Option<String>,
    ) -> Self {
        Self {
            image: image.to_string(),
            status: succ.into(),
            reason,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrePullNodeExtend {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_status: Vec<ImageStatus>,
}

impl KindExtend for ImagePrePullNodeExtend {
    fn apply(
        &mut self,
        extend: &NodeTaskExtend,
    ) {
        if let NodeTaskExtend::Images(images) = extend {
            self.image_status = images.clone();
        }
    }
}
