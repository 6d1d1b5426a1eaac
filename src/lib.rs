//! # edgetask
//!
//! edgetask drives maintenance jobs across a fleet of edge nodes: pre-pulling
//! images, upgrading the node agent and updating its configuration.
//!
//! ## Core Features
//!
//! - **Action flows**: every job kind is a small graph of named actions with
//!   success and failure branches, walked on the edge and mirrored in the cloud
//! - **Bounded fan-out**: each job dispatches to at most `concurrency` nodes at a time
//! - **Single writer per kind**: node-task status is persisted through one
//!   serialized, retrying writer with optimistic concurrency
//! - **Pluggable storage and transport**: in-memory store and hub for tests,
//!   PostgreSQL for production
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use edgetask::{ImagePrePullJob, ImagePrePullSpec, TaskManagerBuilder, transport::LocalHub};
//!
//! let hub = LocalHub::new();
//! let manager = TaskManagerBuilder::new().hub(&hub).build()?;
//! manager.launch();
//!
//! let job = ImagePrePullJob::new("prepull-nginx", ImagePrePullSpec::new(&["nginx:latest"], 2), &["edge-1", "edge-2"]);
//! manager.create_job(job.into()).await?;
//! ```

mod builder;
mod common;
mod config;
mod controller;
pub mod edge;
mod error;
mod executor;
pub mod flow;
mod manager;
mod model;
pub mod reconciler;
pub mod store;
pub mod transport;
mod utils;
pub mod wire;
mod wrapper;

use std::sync::{Arc, RwLock};

pub use builder::TaskManagerBuilder;
pub use common::Shutdown;
pub use config::*;
pub use controller::{DownstreamController, StatusCallback, StatusUpdater, StatusUpdaters, UpdateStatusOptions, UpstreamController};
pub use error::EdgeTaskError;
pub use executor::{Executor, ExecutorRegistry, StatusUpdateFn};
pub use manager::TaskManager;
pub use model::*;
pub use wrapper::{JobWrapper, NodeTaskWrapper};

/// Result type alias for edgetask operations.
pub type Result<T> = std::result::Result<T, EdgeTaskError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
