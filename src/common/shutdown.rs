//! One-shot cancellation signal shared by long-running loops.

use std::sync::Arc;

use tokio::sync::watch;

/// A latch that flips once from running to terminated.
///
/// Loops select on [`Shutdown::wait`]; owners call [`Shutdown::shutdown`].
/// Waiters that subscribe after the flip resolve immediately.
#[derive(Clone, Debug)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            sender: Arc::new(tx),
        }
    }

    /// Flips the latch. Returns `false` if it was already terminated.
    pub fn shutdown(&self) -> bool {
        !self.sender.send_replace(true)
    }

    pub fn is_terminated(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the latch has flipped.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.sender.subscribe();
        async move {
            let _ = rx.wait_for(|terminated| *terminated).await;
        }
    }
}
