use std::{sync::Arc, time::Duration};

use tokio::runtime::Handle;

use crate::{
    AnyJob, ConditionStatus, ImagePrePullJob, ImagePrePullSpec, ImageStatus, JobKind, JobPhase, NodeTaskPhase, NodeUpgradeJob, NodeUpgradeSpec,
    TaskManager, TaskManagerBuilder,
    config::EdgeConfig,
    edge::{
        EdgeTaskManager,
        backend::fake::{FakeImages, FakeInstaller, backends, idle},
    },
    flow::consts,
    transport::{
        LocalHub, MessageLayer,
        mock::{RecordingLayer, StaticSessions},
    },
    wire::{Message, NodeTaskResource, UpstreamMessage},
};

struct Cluster {
    hub: LocalHub,
    manager: TaskManager,
    edges: Vec<Arc<EdgeTaskManager>>,
    images: Arc<FakeImages>,
    installer: Arc<FakeInstaller>,
}

impl Cluster {
    /// A launched manager plus one running edge per node in `edges`.
    fn start(
        edges: &[&str],
        installer: FakeInstaller,
    ) -> Self {
        let hub = LocalHub::new();
        let manager = TaskManagerBuilder::new().hub(&hub).handle(Handle::current()).build().unwrap();
        manager.launch();

        let images = Arc::new(FakeImages::default());
        let installer = Arc::new(installer);
        let backends = backends(idle(), images.clone(), installer.clone());
        let edges = edges
            .iter()
            .map(|node| {
                let edge = EdgeTaskManager::new(node, Arc::new(hub.connect(node)), &backends, &EdgeConfig::default()).unwrap();
                edge.start(&Handle::current());
                edge
            })
            .collect();

        Self {
            hub,
            manager,
            edges,
            images,
            installer,
        }
    }

    fn stop(&self) {
        for edge in self.edges.iter() {
            edge.shutdown();
        }
        self.manager.shutdown();
    }
}

/// Polls the job until `done` holds, panicking after a few seconds.
async fn wait_for(
    manager: &TaskManager,
    kind: JobKind,
    name: &str,
    done: impl Fn(&AnyJob) -> bool,
) -> AnyJob {
    for _ in 0..500 {
        if let Ok(job) = manager.get_job(kind, name).await {
            if done(&job) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{}/{} did not reach the expected state: {:?}", kind, name, manager.get_job(kind, name).await);
}

async fn wait_deregistered(manager: &TaskManager) {
    for _ in 0..500 {
        if manager.registry().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("executor still registered");
}

fn flow_of(job: &AnyJob) -> Vec<Vec<(String, ConditionStatus)>> {
    crate::model::with_job!(job, job => job
        .status
        .node_status
        .iter()
        .map(|t| t.action_flow.iter().map(|a| (a.action.clone(), a.status)).collect())
        .collect())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_image_prepull_happy_path() {
    let cluster = Cluster::start(&["n1", "n2"], FakeInstaller::new("v1.18.0"));
    let job = ImagePrePullJob::new("j1", ImagePrePullSpec::new(&["nginx:latest"], 2), &["n1", "n2"]);
    cluster.manager.create_job(job.into()).await.unwrap();

    let job = wait_for(&cluster.manager, JobKind::ImagePrePull, "j1", |j| j.phase() == JobPhase::Successful).await;
    let AnyJob::ImagePrePull(prepull) = &job else { panic!("unexpected kind") };
    for task in prepull.status.node_status.iter() {
        assert_eq!(task.phase, NodeTaskPhase::Successful);
        assert_eq!(task.extend.image_status, vec![ImageStatus::new("nginx:latest", true, None)]);
    }
    let expected = vec![(consts::CHECK.to_string(), ConditionStatus::True), (consts::PULL.to_string(), ConditionStatus::True)];
    assert_eq!(flow_of(&job), vec![expected.clone(), expected]);
    assert_eq!(cluster.images.pulled.lock().unwrap().len(), 2);

    wait_deregistered(&cluster.manager).await;
    cluster.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_not_connected() {
    let cluster = Cluster::start(&[], FakeInstaller::new("v1.18.0"));
    let job = ImagePrePullJob::new("j2", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n3"]);
    cluster.manager.create_job(job.into()).await.unwrap();

    let job = wait_for(&cluster.manager, JobKind::ImagePrePull, "j2", |j| j.phase() == JobPhase::Failed).await;
    let AnyJob::ImagePrePull(job) = job else { panic!("unexpected kind") };
    let task = &job.status.node_status[0];
    assert_eq!(task.phase, NodeTaskPhase::Failure);
    assert!(task.reason.as_deref().unwrap_or_default().contains("not connected"));
    assert!(cluster.images.pulled.lock().unwrap().is_empty());

    wait_deregistered(&cluster.manager).await;
    cluster.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_failure() {
    let layer = RecordingLayer::failing("transport down");
    let manager = TaskManagerBuilder::new().transport(layer.clone(), StaticSessions::of(&["n4"])).handle(Handle::current()).build().unwrap();
    manager.launch();

    let job = ImagePrePullJob::new("j3", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n4"]);
    manager.create_job(job.into()).await.unwrap();

    let job = wait_for(&manager, JobKind::ImagePrePull, "j3", |j| j.phase() == JobPhase::Failed).await;
    let AnyJob::ImagePrePull(job) = job else { panic!("unexpected kind") };
    let reason = job.status.node_status[0].reason.clone().unwrap_or_default();
    assert!(reason.contains("failed to send"), "{}", reason);
    assert!(reason.contains("transport down"), "{}", reason);
    assert!(layer.sent_resources().is_empty());

    wait_deregistered(&manager).await;
    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_upgrade_rollback() {
    let installer = FakeInstaller {
        upgrade_error: Some("boom".to_string()),
        ..FakeInstaller::new("v1.18.0")
    };
    let cluster = Cluster::start(&["n5"], installer);
    let job = NodeUpgradeJob::new("j4", NodeUpgradeSpec::new("v1.19.0", 1), &["n5"]);
    cluster.manager.create_job(job.into()).await.unwrap();

    let job = wait_for(&cluster.manager, JobKind::NodeUpgrade, "j4", |j| flow_of(j)[0].len() == 5).await;
    assert_eq!(
        flow_of(&job)[0],
        vec![
            (consts::CHECK.to_string(), ConditionStatus::True),
            (consts::WAIT_CONFIRM.to_string(), ConditionStatus::True),
            (consts::BACK_UP.to_string(), ConditionStatus::True),
            (consts::UPGRADE.to_string(), ConditionStatus::False),
            (consts::ROLLBACK.to_string(), ConditionStatus::True),
        ]
    );
    let AnyJob::NodeUpgrade(upgrade) = &job else { panic!("unexpected kind") };
    let task = &upgrade.status.node_status[0];
    assert_eq!(task.phase, NodeTaskPhase::Failure);
    assert_eq!(task.reason.as_deref(), Some("boom"));
    assert_eq!(task.action_flow[3].reason.as_deref(), Some("boom"));
    assert_eq!(upgrade.status.phase, JobPhase::Failed);
    assert_eq!(cluster.installer.calls(), vec!["backup", "upgrade v1.19.0", "rollback"]);

    wait_deregistered(&cluster.manager).await;
    cluster.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_confirm_resumes_paused_upgrade() {
    let cluster = Cluster::start(&["n5"], FakeInstaller::new("v1.18.0"));
    let mut spec = NodeUpgradeSpec::new("v1.19.0", 1);
    spec.require_confirmation = true;
    cluster.manager.create_job(NodeUpgradeJob::new("j7", spec, &["n5"]).into()).await.unwrap();

    let paused = |job: &AnyJob| {
        let AnyJob::NodeUpgrade(job) = job else { return false };
        job.status.node_status[0].current_action == consts::BACK_UP
    };
    wait_for(&cluster.manager, JobKind::NodeUpgrade, "j7", paused).await;
    assert!(cluster.installer.calls().is_empty());
    assert!(cluster.manager.confirm(JobKind::NodeUpgrade, "j7", "n9").await.is_err());

    cluster.manager.confirm(JobKind::NodeUpgrade, "j7", "n5").await.unwrap();
    let job = wait_for(&cluster.manager, JobKind::NodeUpgrade, "j7", |j| j.phase() == JobPhase::Successful).await;
    let AnyJob::NodeUpgrade(job) = job else { panic!("unexpected kind") };
    let task = &job.status.node_status[0];
    assert_eq!(task.phase, NodeTaskPhase::Successful);
    assert_eq!((task.extend.from_version.as_str(), task.extend.to_version.as_str()), ("v1.18.0", "v1.19.0"));
    assert_eq!(cluster.installer.calls(), vec!["backup", "upgrade v1.19.0"]);

    // nothing left to confirm
    assert!(cluster.manager.confirm(JobKind::NodeUpgrade, "j7", "n5").await.is_err());
    cluster.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_cancels_job() {
    // edges connected but silent, so reports never arrive
    let cluster = Cluster::start(&[], FakeInstaller::new("v1.18.0"));
    let links: Vec<_> = ["n1", "n2", "n3", "n4"].iter().map(|n| cluster.hub.connect(n)).collect();
    let job = ImagePrePullJob::new("j6", ImagePrePullSpec::new(&["nginx:latest"], 2), &["n1", "n2", "n3", "n4"]);
    cluster.manager.create_job(job.into()).await.unwrap();

    wait_for(&cluster.manager, JobKind::ImagePrePull, "j6", |j| {
        let AnyJob::ImagePrePull(job) = j else { return false };
        job.status.node_status.iter().filter(|t| t.phase == NodeTaskPhase::InProgress).count() == 2
    })
    .await;
    assert!(cluster.manager.delete_job(JobKind::ImagePrePull, "j6").await.unwrap());
    wait_deregistered(&cluster.manager).await;

    let dispatched: usize = links.iter().map(|l| l.pending()).sum();
    assert_eq!(dispatched, 2);

    // a late report for the deleted job is dropped
    let report = UpstreamMessage::new(consts::CHECK, None, "").encode().unwrap();
    links[0].send(Message::upstream(&NodeTaskResource::new(JobKind::ImagePrePull, "j6", "n1"), report)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cluster.manager.get_job(JobKind::ImagePrePull, "j6").await.is_err());
    assert_eq!(links.iter().map(|l| l.pending()).sum::<usize>(), 2);
    cluster.stop();
}
