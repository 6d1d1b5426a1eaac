//! Cloud-side controllers.
//!
//! - `downstream`: one dispatcher per job kind, job events in, executors out
//! - `upstream`: one reducer for all kinds, edge reports in, status writes out
//! - `status`: one single-writer status updater per job kind

mod downstream;
mod status;
mod upstream;

pub use downstream::DownstreamController;
pub use status::{StatusCallback, StatusUpdater, StatusUpdaters, UpdateStatusOptions};
pub use upstream::UpstreamController;
