use futures::FutureExt;
use tracing::info;

use crate::{
    Result,
    config::EdgeConfig,
    edge::{
        ActionContext, ActionRunner, Reporter,
        actions::{CheckLimits, check_resources, proceed},
        backend::EdgeBackends,
    },
    flow::consts,
    model::ConfigUpdateSpec,
};

pub fn config_update_runner(
    reporter: Reporter,
    backends: &EdgeBackends,
    config: &EdgeConfig,
) -> Result<ActionRunner<ConfigUpdateSpec>> {
    let limits = CheckLimits::from(config);
    let probe = backends.probe.clone();
    let backup = backends.installer.clone();
    let update = backends.installer.clone();
    let rollback = backends.installer.clone();

    Ok(ActionRunner::new(reporter, config.spec_cache_size)?
        .action(consts::CHECK, move |ctx: ActionContext<ConfigUpdateSpec>| {
            let probe = probe.clone();
            async move { check_resources(probe, limits, &ctx.spec.check_items).await }.boxed()
        })
        .action(consts::BACK_UP, move |_: ActionContext<ConfigUpdateSpec>| {
            let installer = backup.clone();
            async move { proceed(installer.backup().await) }.boxed()
        })
        .action(consts::UPDATE, move |ctx: ActionContext<ConfigUpdateSpec>| {
            let installer = update.clone();
            async move {
                let result = installer.update_config(&ctx.spec.overrides).await;
                if result.is_ok() {
                    info!(job = %ctx.job_name, keys = ctx.spec.overrides.len(), "node config updated");
                }
                proceed(result)
            }
            .boxed()
        })
        .action(consts::ROLLBACK, move |_: ActionContext<ConfigUpdateSpec>| {
            let installer = rollback.clone();
            async move { proceed(installer.rollback().await) }.boxed()
        }))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::config_update_runner;
    use crate::{
        common::Shutdown,
        config::EdgeConfig,
        edge::{
            Reporter, Runner,
            backend::fake::{FakeImages, FakeInstaller, backends, idle},
        },
        flow::consts,
        model::ConfigUpdateSpec,
        transport::{LocalHub, MessageLayer},
        wire::UpstreamMessage,
    };

    #[tokio::test]
    async fn test_update_config() {
        let hub = LocalHub::new();
        let installer = Arc::new(FakeInstaller::new("v1.18.0"));
        let backends = backends(idle(), Arc::new(FakeImages::default()), installer.clone());
        let runner = config_update_runner(Reporter::new(Arc::new(hub.connect("n1"))), &backends, &EdgeConfig::default()).unwrap();

        let spec = ConfigUpdateSpec::new(&[("edged.maxPods", "200"), ("edged.cgroupDriver", "systemd")], 1);
        runner.run_action(&Shutdown::new(), "c1", "n1", consts::CHECK, &serde_json::to_vec(&spec).unwrap()).await;

        let cloud = hub.cloud_link();
        let mut actions = Vec::new();
        while let Ok(Ok(msg)) = tokio::time::timeout(std::time::Duration::from_millis(20), cloud.receive()).await {
            let report = UpstreamMessage::decode(&msg.content).unwrap();
            assert!(report.succ);
            actions.push(report.action);
        }
        assert_eq!(actions, vec![consts::CHECK, consts::BACK_UP, consts::UPDATE]);
        assert_eq!(installer.calls(), vec!["backup", "config edged.cgroupDriver=systemd,edged.maxPods=200"]);
    }
}
