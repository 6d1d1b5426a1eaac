//! Node-task resource strings: `{group}/{version}/{resourceType}/{jobName}/node/{nodeName}`.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::{EdgeTaskError, Result, model::JobKind};

/// Group and version prefix shared by every node-task resource.
pub const API_VERSION: &str = "operations/v1alpha2";

const NODE_SEGMENT: &str = "node";

/// Names follow the RFC 1123 subdomain rules used for job and node objects.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("name pattern compiles"));

/// Whether `name` can appear as a job or node segment of a resource string.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Whether `resource` addresses a node-task at all, regardless of its shape.
pub fn is_node_task_resource(resource: &str) -> bool {
    resource.starts_with(API_VERSION)
}

/// A parsed `(kind, job, node)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeTaskResource {
    pub kind: JobKind,
    pub job_name: String,
    pub node_name: String,
}

impl NodeTaskResource {
    pub fn new(
        kind: JobKind,
        job_name: &str,
        node_name: &str,
    ) -> Self {
        Self {
            kind,
            job_name: job_name.to_string(),
            node_name: node_name.to_string(),
        }
    }

    /// Parses a resource string, rejecting anything outside the six-field grammar.
    pub fn parse(resource: &str) -> Result<Self> {
        let malformed = || EdgeTaskError::MalformedResource(resource.to_string());

        let parts: Vec<&str> = resource.split('/').collect();
        if parts.len() != 6 {
            return Err(malformed());
        }
        if format!("{}/{}", parts[0], parts[1]) != API_VERSION || parts[4] != NODE_SEGMENT {
            return Err(malformed());
        }
        let kind = JobKind::from_str(parts[2]).map_err(|_| EdgeTaskError::UnknownKind(parts[2].to_string()))?;

        let (job_name, node_name) = (parts[3], parts[5]);
        if !is_valid_name(job_name) || !is_valid_name(node_name) {
            return Err(malformed());
        }
        Ok(Self::new(kind, job_name, node_name))
    }
}

impl fmt::Display for NodeTaskResource {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}/{}/{}/{}", API_VERSION, self.kind.as_ref(), self.job_name, NODE_SEGMENT, self.node_name)
    }
}

impl FromStr for NodeTaskResource {
    type Err = EdgeTaskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
