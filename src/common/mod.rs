mod cache;
mod pool;
mod queue;
mod shutdown;
mod wait_group;

pub use cache::MemCache;
pub use pool::Pool;
pub use queue::{BroadcastQueue, Queue};
pub use shutdown::Shutdown;
pub use wait_group::WaitGroup;
