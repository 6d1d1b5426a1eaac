use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    EdgeTaskError, Result, ShareLock,
    executor::{Executor, StatusUpdateFn},
    model::JobKind,
    transport::MessageLayer,
    wrapper::JobWrapper,
};

/// Live executors keyed by `(kind, job name)`, at most one per key.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: ShareLock<HashMap<(JobKind, String), Arc<Executor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the executor registered for `job`, creating it when absent.
    /// The flag is true when an executor was already registered.
    pub fn get_or_create(
        self: &Arc<Self>,
        job: JobWrapper,
        layer: Arc<dyn MessageLayer>,
        update_fn: StatusUpdateFn,
    ) -> (Arc<Executor>, bool) {
        let key = (job.kind(), job.name().to_string());
        let mut executors = self.executors.write().unwrap();
        if let Some(executor) = executors.get(&key) {
            return (executor.clone(), true);
        }
        let executor = Arc::new(Executor::new(job, layer, update_fn, Arc::downgrade(self)));
        executors.insert(key, executor.clone());
        debug!(kind = %executor.kind(), job = executor.name(), "executor registered");
        (executor, false)
    }

    pub fn get(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<Arc<Executor>> {
        self.executors.read().unwrap().get(&(kind, name.to_string())).cloned().ok_or_else(|| EdgeTaskError::ExecutorNotExists {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }

    pub fn remove(
        &self,
        kind: JobKind,
        name: &str,
    ) {
        if self.executors.write().unwrap().remove(&(kind, name.to_string())).is_some() {
            debug!(kind = %kind, job = name, "executor removed");
        }
    }

    /// Removes `executor` only if it is still the one registered under its key.
    pub fn remove_if_same(
        &self,
        executor: &Arc<Executor>,
    ) -> bool {
        let key = (executor.kind(), executor.name().to_string());
        let mut executors = self.executors.write().unwrap();
        match executors.get(&key) {
            Some(current) if Arc::ptr_eq(current, executor) => {
                executors.remove(&key);
                debug!(kind = %executor.kind(), job = executor.name(), "executor deregistered");
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.executors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
