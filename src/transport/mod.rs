//! Message layer and session registry seams.
//!
//! The cloud side only needs to submit downstream messages, receive the
//! multiplexed upstream stream and ask which nodes are connected.

mod hub;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::{Result, wire::Message};

pub use hub::{EdgeLink, LocalHub};

/// Bidirectional message transport.
#[async_trait]
pub trait MessageLayer: Send + Sync {
    /// Submits a message; may fail synchronously.
    async fn send(
        &self,
        msg: Message,
    ) -> Result<()>;

    /// Waits for the next incoming message.
    async fn receive(&self) -> Result<Message>;
}

/// Set of edge nodes with a live session.
pub trait SessionRegistry: Send + Sync {
    fn connected_nodes(&self) -> HashSet<String>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;

    use super::{MessageLayer, SessionRegistry};
    use crate::{EdgeTaskError, Result, wire::Message};

    /// Records sent messages, optionally failing every send.
    #[derive(Default)]
    pub struct RecordingLayer {
        pub sent: Mutex<Vec<Message>>,
        pub fail_with: Option<String>,
    }

    impl RecordingLayer {
        pub fn failing(cause: &str) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_with: Some(cause.to_string()),
            })
        }

        pub fn sent_resources(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.resource().to_string()).collect()
        }
    }

    #[async_trait]
    impl MessageLayer for RecordingLayer {
        async fn send(
            &self,
            msg: Message,
        ) -> Result<()> {
            if let Some(cause) = &self.fail_with {
                return Err(EdgeTaskError::Transport(cause.clone()));
            }
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        async fn receive(&self) -> Result<Message> {
            std::future::pending().await
        }
    }

    pub struct StaticSessions(pub HashSet<String>);

    impl StaticSessions {
        pub fn of(nodes: &[&str]) -> Arc<Self> {
            Arc::new(Self(nodes.iter().map(|n| n.to_string()).collect()))
        }
    }

    impl SessionRegistry for StaticSessions {
        fn connected_nodes(&self) -> HashSet<String> {
            self.0.clone()
        }
    }
}
