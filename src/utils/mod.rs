pub mod retry;
pub mod time;

pub use retry::{retry, retry_if};
