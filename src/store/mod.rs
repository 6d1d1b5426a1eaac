//! Resource store for job objects.
//!
//! Provides an abstraction over different storage backends:
//! - `MemStore`: in-memory storage for tests and single-process deployments
//! - `PostgresStore`: PostgreSQL persistence with `LISTEN/NOTIFY` change events

mod db;

use std::error::Error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    EdgeTaskError, Result,
    model::{AnyJob, JobKind},
};

pub use db::{MemStore, PostgresStore};

/// Maps database errors to EdgeTaskError.
fn map_db_err(err: impl Error) -> EdgeTaskError {
    EdgeTaskError::Store(err.to_string())
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    Added(AnyJob),
    Updated(AnyJob),
    Deleted {
        kind: JobKind,
        name: String,
    },
}

impl ResourceEvent {
    pub fn kind(&self) -> JobKind {
        match self {
            ResourceEvent::Added(job) | ResourceEvent::Updated(job) => job.kind(),
            ResourceEvent::Deleted {
                kind,
                ..
            } => *kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceEvent::Added(job) | ResourceEvent::Updated(job) => job.name(),
            ResourceEvent::Deleted {
                name,
                ..
            } => name,
        }
    }
}

/// Compact form of a [`ResourceEvent`] used where only the key travels, e.g. a
/// Postgres notification payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    Added,
    Updated,
    Deleted,
}

/// Job persistence with optimistic concurrency and a change stream.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Reads one job; `NotFound` when absent.
    async fn get(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<AnyJob>;

    async fn list(
        &self,
        kind: JobKind,
    ) -> Result<Vec<AnyJob>>;

    /// Stores a new job with resource version 1.
    async fn create(
        &self,
        job: AnyJob,
    ) -> Result<AnyJob>;

    /// Writes `job` back if its resource version is still current, returning
    /// the stored copy with the bumped version. A stale version yields `Conflict`.
    async fn update_status(
        &self,
        job: &AnyJob,
    ) -> Result<AnyJob>;

    /// Removes a job, returning whether it existed.
    async fn delete(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<bool>;

    /// Subscribes to add/update/delete events from now on.
    fn watch(&self) -> broadcast::Receiver<ResourceEvent>;
}

fn not_found(
    kind: JobKind,
    name: &str,
) -> EdgeTaskError {
    EdgeTaskError::NotFound(format!("{}/{}", kind, name))
}

fn conflict(job: &AnyJob) -> EdgeTaskError {
    EdgeTaskError::Conflict {
        kind: job.kind().to_string(),
        name: job.name().to_string(),
        expected: job.resource_version(),
    }
}
