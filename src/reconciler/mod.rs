//! Periodic firewall reconciler.
//!
//! Every tick the expected tunnel rules are diffed against the rules this
//! reconciler applied before. Additions go first, then deletions, and the
//! recorded set becomes whatever the backend actually accepted.

mod iptables;

use std::{
    collections::BTreeSet,
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{runtime::Handle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{Result, ShareLock, common::Shutdown};

pub use iptables::IptablesBackend;

/// One forwarded tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelRule {
    pub ip: String,
    pub port: u16,
}

impl TunnelRule {
    pub fn new(
        ip: &str,
        port: u16,
    ) -> Self {
        Self {
            ip: ip.to_string(),
            port,
        }
    }
}

impl fmt::Display for TunnelRule {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Where the expected rule set comes from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn expected(&self) -> Result<BTreeSet<TunnelRule>>;
}

#[async_trait]
pub trait FirewallBackend: Send + Sync {
    async fn add(
        &self,
        rule: &TunnelRule,
    ) -> Result<()>;

    async fn delete(
        &self,
        rule: &TunnelRule,
    ) -> Result<()>;
}

/// Rule source kept in memory and replaced wholesale.
#[derive(Default)]
pub struct MemRuleSource {
    rules: RwLock<BTreeSet<TunnelRule>>,
}

impl MemRuleSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(
        &self,
        rules: impl IntoIterator<Item = TunnelRule>,
    ) {
        *self.rules.write().unwrap() = rules.into_iter().collect();
    }
}

#[async_trait]
impl RuleSource for MemRuleSource {
    async fn expected(&self) -> Result<BTreeSet<TunnelRule>> {
        Ok(self.rules.read().unwrap().clone())
    }
}

pub struct IptablesReconciler {
    source: Arc<dyn RuleSource>,
    backend: Arc<dyn FirewallBackend>,
    applied: ShareLock<BTreeSet<TunnelRule>>,
    interval: Duration,
}

impl IptablesReconciler {
    pub fn new(
        source: Arc<dyn RuleSource>,
        backend: Arc<dyn FirewallBackend>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            backend,
            applied: Arc::new(RwLock::new(BTreeSet::new())),
            interval,
        })
    }

    /// Rules currently installed by this reconciler.
    pub fn applied(&self) -> BTreeSet<TunnelRule> {
        self.applied.read().unwrap().clone()
    }

    /// Runs one reconcile pass. Backend failures leave the rule for the next pass.
    pub async fn reconcile(&self) -> Result<()> {
        let expected = self.source.expected().await?;
        let previous = self.applied();
        let mut applied = previous.clone();

        for rule in expected.difference(&previous) {
            match self.backend.add(rule).await {
                Ok(()) => {
                    debug!(rule = %rule, "tunnel rule added");
                    applied.insert(rule.clone());
                }
                Err(err) => warn!(rule = %rule, error = %err, "failed to add tunnel rule"),
            }
        }
        for rule in previous.difference(&expected) {
            match self.backend.delete(rule).await {
                Ok(()) => {
                    debug!(rule = %rule, "tunnel rule deleted");
                    applied.remove(rule);
                }
                Err(err) => warn!(rule = %rule, error = %err, "failed to delete tunnel rule"),
            }
        }

        *self.applied.write().unwrap() = applied;
        Ok(())
    }

    pub fn start(
        self: &Arc<Self>,
        runtime: &Handle,
        shutdown: &Shutdown,
    ) {
        let reconciler = self.clone();
        let shutdown = shutdown.clone();
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(reconciler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = reconciler.reconcile().await {
                            warn!(error = %err, "tunnel rule reconcile failed");
                        }
                    }
                }
            }
            debug!("iptables reconciler stopped");
        });
        info!(interval = ?self.interval, "iptables reconciler started");
    }
}
