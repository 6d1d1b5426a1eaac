use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    EdgeTaskError, Result,
    reconciler::{FirewallBackend, TunnelRule},
};

const NAT_TABLE: &str = "nat";
const DEFAULT_CHAIN: &str = "TUNNEL-PORT";
const DEFAULT_TARGET_PORT: u16 = 10003;

/// DNATs every tunnel port to the stream server through `iptables`.
pub struct IptablesBackend {
    path: String,
    chain: String,
    target_port: u16,
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self::new("iptables", DEFAULT_CHAIN, DEFAULT_TARGET_PORT)
    }
}

impl IptablesBackend {
    pub fn new(
        path: &str,
        chain: &str,
        target_port: u16,
    ) -> Self {
        Self {
            path: path.to_string(),
            chain: chain.to_string(),
            target_port,
        }
    }

    /// Creates the chain and hooks it into PREROUTING unless both already exist.
    pub async fn ensure_chain(&self) -> Result<()> {
        if self.run(&["-t", NAT_TABLE, "-L", &self.chain]).await.is_err() {
            self.run(&["-t", NAT_TABLE, "-N", &self.chain]).await?;
            info!(chain = %self.chain, "created tunnel chain");
        }
        let jump = ["PREROUTING", "-p", "tcp", "-j", self.chain.as_str()];
        let mut check = vec!["-t", NAT_TABLE, "-C"];
        check.extend(jump);
        if self.run(&check).await.is_err() {
            let mut insert = vec!["-t", NAT_TABLE, "-I"];
            insert.extend(jump);
            self.run(&insert).await?;
        }
        Ok(())
    }

    fn rule_args(
        &self,
        op: &'static str,
        rule: &TunnelRule,
    ) -> Vec<String> {
        vec![
            "-t".to_string(),
            NAT_TABLE.to_string(),
            op.to_string(),
            self.chain.clone(),
            "-p".to_string(),
            "tcp".to_string(),
            "--dport".to_string(),
            rule.port.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to".to_string(),
            format!("{}:{}", rule.ip, self.target_port),
        ]
    }

    async fn run(
        &self,
        args: &[&str],
    ) -> Result<()> {
        debug!(iptables = %self.path, args = ?args, "running iptables");
        let output = Command::new(&self.path).args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EdgeTaskError::Runtime(format!("{} {} failed: {}", self.path, args.join(" "), stderr.trim())));
        }
        Ok(())
    }

    async fn run_rule(
        &self,
        op: &'static str,
        rule: &TunnelRule,
    ) -> Result<()> {
        let args = self.rule_args(op, rule);
        let args: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
        self.run(&args).await
    }
}

#[async_trait]
impl FirewallBackend for IptablesBackend {
    async fn add(
        &self,
        rule: &TunnelRule,
    ) -> Result<()> {
        self.run_rule("-A", rule).await
    }

    async fn delete(
        &self,
        rule: &TunnelRule,
    ) -> Result<()> {
        self.run_rule("-D", rule).await
    }
}
