use std::time::Duration;

use futures::FutureExt;
use tracing::{info, warn};

use crate::{
    Result,
    config::EdgeConfig,
    edge::{
        ActionContext, ActionResponse, ActionRunner, Reporter,
        actions::{CheckLimits, check_resources},
        backend::EdgeBackends,
    },
    flow::consts,
    model::{ImagePrePullSpec, ImageStatus},
    utils,
};

const PULL_FAILED: &str = "there were some failures when pulling images";

pub fn image_prepull_runner(
    reporter: Reporter,
    backends: &EdgeBackends,
    config: &EdgeConfig,
) -> Result<ActionRunner<ImagePrePullSpec>> {
    let limits = CheckLimits::from(config);
    let interval = Duration::from_millis(config.pull_retry_interval_ms);

    let probe = backends.probe.clone();
    let pull_backends = backends.clone();
    Ok(ActionRunner::new(reporter, config.spec_cache_size)?
        .action(consts::CHECK, move |ctx: ActionContext<ImagePrePullSpec>| {
            let probe = probe.clone();
            async move { check_resources(probe, limits, &ctx.spec.check_items).await }.boxed()
        })
        .action(consts::PULL, move |ctx| pull(pull_backends.clone(), interval, ctx).boxed()))
}

async fn pull(
    backends: EdgeBackends,
    interval: Duration,
    ctx: ActionContext<ImagePrePullSpec>,
) -> ActionResponse {
    let spec = ctx.spec;
    let mut statuses = Vec::with_capacity(spec.images.len());
    for image in spec.images.iter() {
        let pulled = pull_image(&backends, &spec, image, interval).await;
        if let Err(err) = &pulled {
            warn!(job = %ctx.job_name, image = %image, error = %err, "image pull failed");
        }
        statuses.push(ImageStatus::new(image, pulled.is_ok(), pulled.err().map(|e| e.to_string())));
    }

    let extend = match serde_json::to_string(&statuses) {
        Ok(extend) => extend,
        Err(err) => return ActionResponse::fail(err),
    };
    if statuses.iter().all(|s| s.reason.is_none()) {
        info!(job = %ctx.job_name, images = statuses.len(), "images pulled");
        ActionResponse::next().with_extend(extend)
    } else {
        ActionResponse::fail(PULL_FAILED).with_extend(extend)
    }
}

async fn pull_image(
    backends: &EdgeBackends,
    spec: &ImagePrePullSpec,
    image: &str,
    interval: Duration,
) -> Result<()> {
    let auth = match &spec.image_secret {
        Some(secret) => backends.credentials.lookup(secret, image)?,
        None => None,
    };
    utils::retry(spec.retry_times as usize + 1, interval, |_| backends.images.pull(image, auth.as_ref())).await
}
