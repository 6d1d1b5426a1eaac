//! PostgreSQL job store.
//!
//! Jobs live in one `jobs` table keyed by `(kind, name)`; the JSON document
//! sits in `data` and `resource_version` guards optimistic updates. Every
//! write issues `pg_notify` on [`NOTIFY_CHANNEL`], and a listener task turns
//! notifications back into [`ResourceEvent`]s.

mod jobs;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
    PgPool,
    postgres::{PgListener, PgPoolOptions},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    Result,
    common::BroadcastQueue,
    model::{AnyJob, JobKind},
    store::{EventOp, JobStore, ResourceEvent, conflict, map_db_err, not_found},
};

use jobs::JobCollection;

/// Channel used for change notifications.
pub const NOTIFY_CHANNEL: &str = "edgetask_jobs";

const EVENT_CAPACITY: usize = 1024;

/// Payload of a change notification; the listener re-reads the row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Notification {
    op: EventOp,
    kind: JobKind,
    name: String,
}

pub struct PostgresStore {
    jobs: Arc<JobCollection>,
    events: Arc<BroadcastQueue<ResourceEvent>>,
    listener: JoinHandle<()>,
}

impl PostgresStore {
    /// Connects, creates the table when missing and starts the notification listener.
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().acquire_timeout(Duration::from_secs(5)).max_connections(20).connect(db_url).await.map_err(map_db_err)?;
        let jobs = Arc::new(JobCollection::new(pool.clone()));
        jobs.init().await?;

        let events = BroadcastQueue::new(EVENT_CAPACITY);
        let mut listener = PgListener::connect_with(&pool).await.map_err(map_db_err)?;
        listener.listen(NOTIFY_CHANNEL).await.map_err(map_db_err)?;
        let listener = tokio::spawn(listen(listener, jobs.clone(), events.clone()));

        Ok(Self {
            jobs,
            events,
            listener,
        })
    }

    pub fn pool(&self) -> &PgPool {
        self.jobs.pool()
    }

    async fn notify(
        &self,
        op: EventOp,
        kind: JobKind,
        name: &str,
    ) -> Result<()> {
        let payload = serde_json::to_string(&Notification {
            op,
            kind,
            name: name.to_string(),
        })?;
        sqlx::query("SELECT pg_notify($1, $2)").bind(NOTIFY_CHANNEL).bind(payload).execute(self.jobs.pool()).await.map_err(map_db_err)?;
        Ok(())
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(
    mut listener: PgListener,
    jobs: Arc<JobCollection>,
    events: Arc<BroadcastQueue<ResourceEvent>>,
) {
    loop {
        let notification = match listener.recv().await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "postgres listener stopped");
                return;
            }
        };
        let Ok(note) = serde_json::from_str::<Notification>(notification.payload()) else {
            warn!(payload = notification.payload(), "ignoring malformed job notification");
            continue;
        };
        let event = match note.op {
            EventOp::Deleted => ResourceEvent::Deleted {
                kind: note.kind,
                name: note.name,
            },
            op => match jobs.find(note.kind, &note.name).await {
                Ok(Some(job)) if op == EventOp::Added => ResourceEvent::Added(job),
                Ok(Some(job)) => ResourceEvent::Updated(job),
                Ok(None) => continue,
                Err(err) => {
                    warn!(kind = %note.kind, job = %note.name, error = %err, "failed to read notified job");
                    continue;
                }
            },
        };
        debug!(kind = %event.kind(), job = event.name(), "job notification");
        events.send(event);
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn get(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<AnyJob> {
        self.jobs.find(kind, name).await?.ok_or_else(|| not_found(kind, name))
    }

    async fn list(
        &self,
        kind: JobKind,
    ) -> Result<Vec<AnyJob>> {
        self.jobs.list(kind).await
    }

    async fn create(
        &self,
        mut job: AnyJob,
    ) -> Result<AnyJob> {
        job.validate()?;
        job.metadata_mut().resource_version = 1;
        self.jobs.insert(&job).await?;
        self.notify(EventOp::Added, job.kind(), job.name()).await?;
        Ok(job)
    }

    async fn update_status(
        &self,
        job: &AnyJob,
    ) -> Result<AnyJob> {
        let mut next = job.clone();
        next.metadata_mut().resource_version = job.resource_version() + 1;
        if !self.jobs.compare_and_swap(job.resource_version(), &next).await? {
            return match self.jobs.find(job.kind(), job.name()).await? {
                Some(_) => Err(conflict(job)),
                None => Err(not_found(job.kind(), job.name())),
            };
        }
        self.notify(EventOp::Updated, next.kind(), next.name()).await?;
        Ok(next)
    }

    async fn delete(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<bool> {
        let removed = self.jobs.delete(kind, name).await?;
        if removed {
            self.notify(EventOp::Deleted, kind, name).await?;
        }
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }
}
