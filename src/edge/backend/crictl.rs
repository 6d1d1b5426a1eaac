use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{
    EdgeTaskError, Result,
    edge::backend::{ImageRuntime, RegistryAuth},
};

/// Pulls images through the CRI command line client.
pub struct CrictlRuntime {
    path: String,
}

impl CrictlRuntime {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl ImageRuntime for CrictlRuntime {
    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("pull");
        if let Some(auth) = auth {
            cmd.arg("--creds").arg(format!("{}:{}", auth.username, auth.password));
        }
        cmd.arg(image);
        debug!(image, tool = %self.path, "pulling image");

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EdgeTaskError::Action(format!("failed to pull image {}: {}", image, stderr.trim())));
        }
        Ok(())
    }
}
