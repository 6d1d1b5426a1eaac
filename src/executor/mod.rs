//! Per-job dispatch with bounded parallelism.

mod executor;
mod registry;

pub use executor::{Executor, StatusUpdateFn};
pub use registry::ExecutorRegistry;
