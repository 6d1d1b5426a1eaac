use serde::{Deserialize, Serialize};

use crate::Result;

/// Body of an edge → cloud action report.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UpstreamMessage {
    /// the action whose completion is reported
    pub action: String,
    pub succ: bool,
    #[serde(default)]
    pub reason: String,
    /// kind-specific payload, see `NodeTaskExtend`
    #[serde(default)]
    pub extend: String,
}

impl UpstreamMessage {
    pub fn new(
        action: &str,
        error: Option<&str>,
        extend: &str,
    ) -> Self {
        Self {
            action: action.to_string(),
            succ: error.is_none(),
            reason: error.unwrap_or_default().to_string(),
            extend: extend.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<String> {
        if self.reason.is_empty() { None } else { Some(self.reason.clone()) }
    }
}
