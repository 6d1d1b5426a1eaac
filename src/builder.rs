use std::{sync::Arc, time::Duration};

use tokio::runtime::{Builder, Handle, Runtime};

use crate::{
    Config, EdgeTaskError, Result, StoreType, TaskManager,
    reconciler::{FirewallBackend, IptablesBackend, IptablesReconciler, MemRuleSource, RuleSource},
    store::{JobStore, MemStore, PostgresStore},
    transport::{LocalHub, MessageLayer, SessionRegistry},
};

#[derive(Default)]
pub struct TaskManagerBuilder {
    config: Config,
    store: Option<Arc<dyn JobStore>>,
    layer: Option<Arc<dyn MessageLayer>>,
    sessions: Option<Arc<dyn SessionRegistry>>,
    rules: Option<Arc<dyn RuleSource>>,
    firewall: Option<Arc<dyn FirewallBackend>>,
    rt: Option<Arc<Runtime>>,
    handle: Option<Handle>,
}

impl TaskManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.config.async_worker_thread_number = n;
        self
    }

    /// Store to use instead of the one `[store]` describes.
    pub fn store(
        mut self,
        store: Arc<dyn JobStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(
        mut self,
        layer: Arc<dyn MessageLayer>,
        sessions: Arc<dyn SessionRegistry>,
    ) -> Self {
        self.layer = Some(layer);
        self.sessions = Some(sessions);
        self
    }

    /// Uses the cloud end of an in-process hub as transport and session registry.
    pub fn hub(
        self,
        hub: &LocalHub,
    ) -> Self {
        self.transport(hub.cloud_link(), Arc::new(hub.clone()))
    }

    /// Enables the reconciler with the given rule source and firewall.
    pub fn reconciler(
        mut self,
        rules: Arc<dyn RuleSource>,
        firewall: Arc<dyn FirewallBackend>,
    ) -> Self {
        self.config.reconciler.enabled = true;
        self.rules = Some(rules);
        self.firewall = Some(firewall);
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    /// Runs the manager on an existing runtime, e.g. `Handle::current()`.
    pub fn handle(
        mut self,
        handle: Handle,
    ) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<TaskManager> {
        let layer = self.layer.ok_or_else(|| EdgeTaskError::Config("a message layer is required".to_string()))?;
        let sessions = self.sessions.ok_or_else(|| EdgeTaskError::Config("a session registry is required".to_string()))?;

        let (handle, runtime) = match (self.handle, self.rt) {
            (Some(handle), _) => (handle, None),
            (None, Some(rt)) => (rt.handle().clone(), Some(rt)),
            (None, None) => {
                let rt = Builder::new_multi_thread()
                    .worker_threads(self.config.async_worker_thread_number.into())
                    .enable_all()
                    .build()
                    .map_err(|e| EdgeTaskError::Runtime(format!("failed to build runtime: {}", e)))?;
                let rt = Arc::new(rt);
                (rt.handle().clone(), Some(rt))
            }
        };

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config, runtime.as_deref())?,
        };

        let reconciler = if self.config.reconciler.enabled {
            let rules: Arc<dyn RuleSource> = match self.rules {
                Some(rules) => rules,
                None => MemRuleSource::new(),
            };
            let firewall: Arc<dyn FirewallBackend> = match self.firewall {
                Some(firewall) => firewall,
                None => Arc::new(IptablesBackend::default()),
            };
            Some(IptablesReconciler::new(rules, firewall, Duration::from_secs(self.config.reconciler.interval_secs)))
        } else {
            None
        };

        TaskManager::new(self.config, store, layer, sessions, reconciler, handle, runtime)
    }
}

/// Opens the store `[store]` describes.
fn open_store(
    config: &Config,
    runtime: Option<&Runtime>,
) -> Result<Arc<dyn JobStore>> {
    match config.store.store_type {
        StoreType::Mem => Ok(Arc::new(MemStore::new())),
        StoreType::Postgres => {
            let postgres = config.store.postgres.as_ref().ok_or_else(|| EdgeTaskError::Config("[store.postgres] is required when store_type is postgres".to_string()))?;
            // Connecting blocks, which is only safe on a runtime we own.
            let Some(rt) = runtime else {
                return Err(EdgeTaskError::Config("pass a connected store when building on an external runtime".to_string()));
            };
            Ok(Arc::new(rt.block_on(PostgresStore::connect(&postgres.database_url))?))
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::runtime::Handle;

    use super::TaskManagerBuilder;
    use crate::{Config, EdgeTaskError, transport::LocalHub};

    #[test]
    fn test_requires_transport() {
        assert!(matches!(TaskManagerBuilder::new().build(), Err(EdgeTaskError::Config(_))));
    }

    #[tokio::test]
    async fn test_postgres_needs_store_on_external_runtime() {
        let config = Config::load_from_str("[store]\nstore_type = \"postgres\"\n[store.postgres]\ndatabase_url = \"postgres://localhost/edgetask\"\n").unwrap();
        let built = TaskManagerBuilder::new().config(config).hub(&LocalHub::new()).handle(Handle::current()).build();
        assert!(matches!(built, Err(EdgeTaskError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_on_handle() {
        let manager = TaskManagerBuilder::new().hub(&LocalHub::new()).handle(Handle::current()).build().unwrap();
        assert!(!manager.is_running());
        manager.launch();
        assert!(manager.is_running());
        manager.shutdown();
        assert!(!manager.is_running());
    }
}
