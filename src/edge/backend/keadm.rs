use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::{
    EdgeTaskError, Result,
    edge::backend::NodeInstaller,
};

/// Drives the node installer binary.
pub struct KeadmInstaller {
    path: String,
}

impl KeadmInstaller {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }

    async fn run(
        &self,
        args: &[&str],
    ) -> Result<String> {
        info!(installer = %self.path, args = ?args, "running installer");
        let output = Command::new(&self.path).args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EdgeTaskError::Action(format!("{} {} failed: {}", self.path, args.join(" "), stderr.trim())));
        }
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}

/// Extracts `v1.2.3` from installer version output such as
/// `version: version.Info{Major:"1", GitVersion:"v1.2.3", ...}`.
fn parse_version(output: &str) -> Option<String> {
    let start = output.find("GitVersion:\"").map(|i| i + "GitVersion:\"".len());
    match start {
        Some(start) => output[start..].split('"').next().map(|v| v.to_string()),
        None => output.split_whitespace().find(|w| w.starts_with('v')).map(|v| v.to_string()),
    }
}

#[async_trait]
impl NodeInstaller for KeadmInstaller {
    async fn current_version(&self) -> Result<String> {
        let output = self.run(&["version"]).await?;
        parse_version(&output).ok_or_else(|| EdgeTaskError::Convert(format!("unrecognized version output '{}'", output)))
    }

    async fn backup(&self) -> Result<()> {
        self.run(&["backup", "edge"]).await.map(|_| ())
    }

    async fn upgrade(
        &self,
        version: &str,
        image: Option<&str>,
    ) -> Result<()> {
        let mut args = vec!["upgrade", "edge", "--toVersion", version];
        if let Some(image) = image {
            args.extend(["--image", image]);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn update_config(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<()> {
        let set = overrides.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",");
        self.run(&["config", "update", "--set", &set]).await.map(|_| ())
    }

    async fn rollback(&self) -> Result<()> {
        self.run(&["rollback", "edge"]).await.map(|_| ())
    }
}
