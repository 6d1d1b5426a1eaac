use futures::FutureExt;
use tracing::{info, warn};

use crate::{
    Result,
    config::EdgeConfig,
    edge::{
        ActionContext, ActionResponse, ActionRunner, Reporter,
        actions::{CheckLimits, check_resources, proceed},
        backend::EdgeBackends,
    },
    flow::consts,
    model::NodeUpgradeSpec,
};

pub fn node_upgrade_runner(
    reporter: Reporter,
    backends: &EdgeBackends,
    config: &EdgeConfig,
) -> Result<ActionRunner<NodeUpgradeSpec>> {
    let limits = CheckLimits::from(config);
    let probe = backends.probe.clone();
    let backup = backends.installer.clone();
    let upgrade = backends.installer.clone();
    let rollback = backends.installer.clone();

    Ok(ActionRunner::new(reporter, config.spec_cache_size)?
        .action(consts::CHECK, move |ctx: ActionContext<NodeUpgradeSpec>| {
            let probe = probe.clone();
            async move { check_resources(probe, limits, &ctx.spec.check_items).await }.boxed()
        })
        .action(consts::WAIT_CONFIRM, |ctx: ActionContext<NodeUpgradeSpec>| {
            async move {
                if ctx.spec.require_confirmation {
                    info!(job = %ctx.job_name, node = %ctx.node_name, "upgrade waits for confirmation");
                    ActionResponse::pause()
                } else {
                    ActionResponse::next()
                }
            }
            .boxed()
        })
        .action(consts::BACK_UP, move |_: ActionContext<NodeUpgradeSpec>| {
            let installer = backup.clone();
            async move { proceed(installer.backup().await) }.boxed()
        })
        .action(consts::UPGRADE, move |ctx: ActionContext<NodeUpgradeSpec>| {
            let installer = upgrade.clone();
            async move {
                let from = match installer.current_version().await {
                    Ok(version) => version,
                    Err(err) => return ActionResponse::fail(err),
                };
                let to = ctx.spec.version.clone();
                let extend = format!("{},{}", from, to);
                match installer.upgrade(&to, ctx.spec.image.as_deref()).await {
                    Ok(()) => {
                        info!(job = %ctx.job_name, from = %from, to = %to, "node upgraded");
                        ActionResponse::next().with_extend(extend)
                    }
                    Err(err) => {
                        warn!(job = %ctx.job_name, from = %from, to = %to, error = %err, "node upgrade failed");
                        ActionResponse::fail(err).with_extend(extend)
                    }
                }
            }
            .boxed()
        })
        .action(consts::ROLLBACK, move |_: ActionContext<NodeUpgradeSpec>| {
            let installer = rollback.clone();
            async move { proceed(installer.rollback().await) }.boxed()
        }))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::node_upgrade_runner;
    use crate::{
        common::Shutdown,
        config::EdgeConfig,
        edge::{
            Reporter, Runner,
            backend::fake::{FakeImages, FakeInstaller, backends, idle},
        },
        flow::consts,
        model::NodeUpgradeSpec,
        transport::{LocalHub, MessageLayer},
        wire::UpstreamMessage,
    };

    async fn run(
        installer: Arc<FakeInstaller>,
        spec: &NodeUpgradeSpec,
        action: &str,
    ) -> Vec<UpstreamMessage> {
        let hub = LocalHub::new();
        let reporter = Reporter::new(Arc::new(hub.connect("n5")));
        let backends = backends(idle(), Arc::new(FakeImages::default()), installer);
        let runner = node_upgrade_runner(reporter, &backends, &EdgeConfig::default()).unwrap();
        runner.run_action(&Shutdown::new(), "j4", "n5", action, &serde_json::to_vec(spec).unwrap()).await;

        let cloud = hub.cloud_link();
        let mut reports = Vec::new();
        while let Ok(Ok(msg)) = tokio::time::timeout(std::time::Duration::from_millis(20), cloud.receive()).await {
            reports.push(UpstreamMessage::decode(&msg.content).unwrap());
        }
        reports
    }

    #[tokio::test]
    async fn test_upgrade() {
        let installer = Arc::new(FakeInstaller::new("v1.18.0"));
        let reports = run(installer.clone(), &NodeUpgradeSpec::new("v1.19.0", 1), consts::CHECK).await;

        let actions: Vec<&str> = reports.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec![consts::CHECK, consts::WAIT_CONFIRM, consts::BACK_UP, consts::UPGRADE]);
        assert!(reports.iter().all(|r| r.succ));
        assert_eq!(reports[3].extend, "v1.18.0,v1.19.0");
        assert_eq!(installer.calls(), vec!["backup", "upgrade v1.19.0"]);
    }

    #[tokio::test]
    async fn test_failed_upgrade_rolls_back() {
        let installer = Arc::new(FakeInstaller {
            upgrade_error: Some("boom".to_string()),
            ..FakeInstaller::new("v1.18.0")
        });
        let reports = run(installer.clone(), &NodeUpgradeSpec::new("v1.19.0", 1), consts::CHECK).await;

        let actions: Vec<(&str, bool)> = reports.iter().map(|r| (r.action.as_str(), r.succ)).collect();
        assert_eq!(
            actions,
            vec![(consts::CHECK, true), (consts::WAIT_CONFIRM, true), (consts::BACK_UP, true), (consts::UPGRADE, false), (consts::ROLLBACK, true)]
        );
        assert_eq!(reports[3].reason, "boom");
        assert_eq!(installer.calls(), vec!["backup", "upgrade v1.19.0", "rollback"]);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let installer = Arc::new(FakeInstaller::new("v1.18.0"));
        let mut spec = NodeUpgradeSpec::new("v1.19.0", 1);
        spec.require_confirmation = true;

        let reports = run(installer.clone(), &spec, consts::CHECK).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].action, consts::WAIT_CONFIRM);
        assert!(installer.calls().is_empty());

        let reports = run(installer.clone(), &spec, consts::BACK_UP).await;
        let actions: Vec<&str> = reports.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec![consts::BACK_UP, consts::UPGRADE]);
    }
}
