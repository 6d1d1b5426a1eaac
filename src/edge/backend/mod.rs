//! Host integrations used by edge actions.
//!
//! Each concern sits behind a small trait so actions stay testable; the
//! default implementations talk to the real host.

mod credentials;
mod crictl;
mod keadm;
mod probe;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::{Result, config::EdgeConfig};

pub use credentials::{DockerConfigCredentials, RegistryAuth};
pub use crictl::CrictlRuntime;
pub use keadm::KeadmInstaller;
pub use probe::SysinfoProbe;

/// Host resource usage in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
}

pub trait ResourceProbe: Send + Sync {
    /// Samples current usage. May block for a short while.
    fn usage(&self) -> Result<ResourceUsage>;
}

#[async_trait]
pub trait ImageRuntime: Send + Sync {
    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<()>;
}

pub trait CredentialProvider: Send + Sync {
    /// Registry credentials for `image` found in the pull secret `secret`.
    fn lookup(
        &self,
        secret: &str,
        image: &str,
    ) -> Result<Option<RegistryAuth>>;
}

/// Local installer driving node upgrades and configuration changes.
#[async_trait]
pub trait NodeInstaller: Send + Sync {
    async fn current_version(&self) -> Result<String>;

    /// Saves what [`NodeInstaller::rollback`] restores.
    async fn backup(&self) -> Result<()>;

    async fn upgrade(
        &self,
        version: &str,
        image: Option<&str>,
    ) -> Result<()>;

    async fn update_config(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

/// The set of host integrations an edge node runs with.
#[derive(Clone)]
pub struct EdgeBackends {
    pub probe: Arc<dyn ResourceProbe>,
    pub images: Arc<dyn ImageRuntime>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub installer: Arc<dyn NodeInstaller>,
}

impl EdgeBackends {
    /// Backends talking to the local host through the configured tools.
    pub fn host(config: &EdgeConfig) -> Self {
        Self {
            probe: Arc::new(SysinfoProbe::new()),
            images: Arc::new(CrictlRuntime::new(&config.image_tool_path)),
            credentials: Arc::new(DockerConfigCredentials::new()),
            installer: Arc::new(KeadmInstaller::new(&config.installer_path)),
        }
    }
}
