use std::{sync::Arc, time::Duration};

use tracing::{debug, error};

use crate::{
    edge::ActionResponse,
    transport::MessageLayer,
    utils,
    wire::{Message, NodeTaskResource, UpstreamMessage},
};

const REPORT_ATTEMPTS: usize = 3;
const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Sends action outcomes back to the cloud.
#[derive(Clone)]
pub struct Reporter {
    layer: Arc<dyn MessageLayer>,
}

impl Reporter {
    pub fn new(layer: Arc<dyn MessageLayer>) -> Self {
        Self {
            layer,
        }
    }

    /// Reports `resp` for `action`. Failures are logged; nothing waits for an ack.
    pub async fn report(
        &self,
        resource: &NodeTaskResource,
        action: &str,
        resp: &ActionResponse,
    ) {
        let body = match UpstreamMessage::new(action, resp.error(), resp.extend()).encode() {
            Ok(body) => body,
            Err(err) => {
                error!(resource = %resource, action, error = %err, "failed to encode action report");
                return;
            }
        };
        debug!(resource = %resource, action, succ = resp.error().is_none(), "reporting action");

        let msg = Message::upstream(resource, body);
        let sent = utils::retry(REPORT_ATTEMPTS, REPORT_INTERVAL, |_| {
            let msg = msg.clone();
            async move { self.layer.send(msg).await }
        })
        .await;
        if let Err(err) = sent {
            error!(resource = %resource, action, error = %err, "failed to report action");
        }
    }
}
