use std::sync::Arc;

use tokio::sync::watch;

/// Counts outstanding work items; [`WaitGroup::wait`] resolves when the count is zero.
#[derive(Clone, Debug)]
pub struct WaitGroup {
    count: Arc<watch::Sender<usize>>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }

    pub fn add(
        &self,
        n: usize,
    ) {
        self.count.send_modify(|count| *count += n);
    }

    /// Marks one item done. Extra calls are ignored rather than wrapping.
    pub fn done(&self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.count.subscribe();
        async move {
            let _ = rx.wait_for(|count| *count == 0).await;
        }
    }
}
