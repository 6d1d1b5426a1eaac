use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{
    EdgeTaskError, Result, ShareLock,
    common::BroadcastQueue,
    model::{AnyJob, JobKind},
    store::{JobStore, ResourceEvent, conflict, not_found},
};

const EVENT_CAPACITY: usize = 1024;

/// In-memory job store.
#[derive(Clone)]
pub struct MemStore {
    jobs: ShareLock<HashMap<(JobKind, String), AnyJob>>,
    events: Arc<BroadcastQueue<ResourceEvent>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            events: BroadcastQueue::new(EVENT_CAPACITY),
        }
    }

    fn publish(
        &self,
        event: ResourceEvent,
    ) {
        let receivers = self.events.send(event);
        trace!(receivers, "published resource event");
    }
}

#[async_trait]
impl JobStore for MemStore {
    async fn get(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<AnyJob> {
        self.jobs.read().unwrap().get(&(kind, name.to_string())).cloned().ok_or_else(|| not_found(kind, name))
    }

    async fn list(
        &self,
        kind: JobKind,
    ) -> Result<Vec<AnyJob>> {
        let jobs = self.jobs.read().unwrap();
        let mut list: Vec<AnyJob> = jobs.iter().filter(|((k, _), _)| *k == kind).map(|(_, job)| job.clone()).collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(list)
    }

    async fn create(
        &self,
        mut job: AnyJob,
    ) -> Result<AnyJob> {
        job.validate()?;
        job.metadata_mut().resource_version = 1;
        {
            let mut jobs = self.jobs.write().unwrap();
            let key = (job.kind(), job.name().to_string());
            if jobs.contains_key(&key) {
                return Err(EdgeTaskError::Store(format!("{}/{} already exists", job.kind(), job.name())));
            }
            jobs.insert(key, job.clone());
        }
        self.publish(ResourceEvent::Added(job.clone()));
        Ok(job)
    }

    async fn update_status(
        &self,
        job: &AnyJob,
    ) -> Result<AnyJob> {
        let stored = {
            let mut jobs = self.jobs.write().unwrap();
            let current = jobs.get_mut(&(job.kind(), job.name().to_string())).ok_or_else(|| not_found(job.kind(), job.name()))?;
            if current.resource_version() != job.resource_version() {
                return Err(conflict(job));
            }
            let mut next = job.clone();
            next.metadata_mut().resource_version = job.resource_version() + 1;
            *current = next.clone();
            next
        };
        self.publish(ResourceEvent::Updated(stored.clone()));
        Ok(stored)
    }

    async fn delete(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<bool> {
        let removed = self.jobs.write().unwrap().remove(&(kind, name.to_string())).is_some();
        if removed {
            self.publish(ResourceEvent::Deleted {
                kind,
                name: name.to_string(),
            });
        }
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }
}
