use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};

use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::{
    EdgeTaskError, Result,
    common::{Pool, Shutdown, WaitGroup},
    executor::ExecutorRegistry,
    model::{JobKind, NodeTaskPhase},
    transport::MessageLayer,
    wire::{Message, NodeTaskResource},
    wrapper::{JobWrapper, NodeTaskWrapper},
};

/// Persists the in-memory change of one node-task.
pub type StatusUpdateFn = Arc<dyn Fn(NodeTaskWrapper) -> BoxFuture<'static, ()> + Send + Sync>;

/// Orchestrates the node-tasks of one job.
///
/// A permit is taken per dispatched node and held until the upstream reducer
/// sees that node's final report and calls [`Executor::finish_task`]. Failed
/// dispatches give their permit back immediately.
pub struct Executor {
    job: JobWrapper,
    pool: Pool,
    interrupted: Shutdown,
    wg: WaitGroup,
    layer: Arc<dyn MessageLayer>,
    update_fn: StatusUpdateFn,
    registry: Weak<ExecutorRegistry>,
}

impl Executor {
    pub(crate) fn new(
        job: JobWrapper,
        layer: Arc<dyn MessageLayer>,
        update_fn: StatusUpdateFn,
        registry: Weak<ExecutorRegistry>,
    ) -> Self {
        let pool = Pool::new(job.concurrency() as usize);
        Self {
            job,
            pool,
            interrupted: Shutdown::new(),
            wg: WaitGroup::new(),
            layer,
            update_fn,
            registry,
        }
    }

    pub fn job(&self) -> &JobWrapper {
        &self.job
    }

    pub fn kind(&self) -> JobKind {
        self.job.kind()
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// Permits currently held by dispatched node-tasks.
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Node-tasks dispatched and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.wg.count()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_terminated()
    }

    /// Dispatches every pending node-task in stored order, then waits for
    /// their completions and deregisters.
    ///
    /// Returns early when `ctx` is cancelled or the executor is interrupted;
    /// outstanding node-tasks are then abandoned.
    pub async fn execute(
        self: &Arc<Self>,
        ctx: &Shutdown,
        connected: &HashSet<String>,
    ) {
        info!(kind = %self.kind(), job = self.name(), "executing job");
        match self.job.spec() {
            Ok(spec) => self.dispatch_all(ctx, connected, spec).await,
            Err(err) => error!(kind = %self.kind(), job = self.name(), error = %err, "failed to encode job spec"),
        }

        tokio::select! {
            _ = self.wg.wait() => debug!(kind = %self.kind(), job = self.name(), "all node tasks finished"),
            _ = self.interrupted.wait() => info!(kind = %self.kind(), job = self.name(), outstanding = self.outstanding(), "job interrupted"),
            _ = ctx.wait() => debug!(kind = %self.kind(), job = self.name(), "job execution cancelled"),
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(self);
        }
    }

    async fn dispatch_all(
        &self,
        ctx: &Shutdown,
        connected: &HashSet<String>,
        spec: Vec<u8>,
    ) {
        for mut task in self.job.tasks() {
            if self.is_interrupted() || ctx.is_terminated() {
                return;
            }
            if !task.can_execute() {
                continue;
            }

            tokio::select! {
                biased;
                _ = ctx.wait() => return,
                _ = self.interrupted.wait() => return,
                acquired = self.pool.acquire() => {
                    if let Err(err) = acquired {
                        error!(kind = %self.kind(), job = self.name(), error = %err, "failed to acquire a dispatch slot");
                        return;
                    }
                }
            }
            self.wg.add(1);

            match self.dispatch(&task, &spec, connected).await {
                Ok(()) => {
                    if task.phase() != NodeTaskPhase::InProgress {
                        task.set_phase(NodeTaskPhase::InProgress, None);
                    }
                }
                Err(err) => {
                    warn!(kind = %self.kind(), job = self.name(), node = task.node_name(), error = %err, "dispatch failed");
                    task.set_phase(NodeTaskPhase::Failure, Some(err.to_string()));
                    self.finish_task();
                }
            }
            (self.update_fn)(task).await;
        }
    }

    async fn dispatch(
        &self,
        task: &NodeTaskWrapper,
        spec: &[u8],
        connected: &HashSet<String>,
    ) -> Result<()> {
        if !connected.contains(task.node_name()) {
            return Err(EdgeTaskError::NodeNotConnected(task.node_name().to_string()));
        }
        let action = task.action()?;
        let resource = NodeTaskResource::new(self.kind(), self.name(), task.node_name());
        debug!(kind = %self.kind(), job = self.name(), node = task.node_name(), action = action.name(), "sending action");

        let msg = Message::downstream(&resource, action.name(), spec.to_vec());
        self.layer.send(msg).await.map_err(|e| EdgeTaskError::Send(e.to_string()))
    }

    /// Releases the permit of one finished node-task.
    pub fn finish_task(&self) {
        self.pool.release();
        self.wg.done();
    }

    /// Stops dispatching at the next task boundary. In-flight node-tasks keep
    /// their permits.
    pub fn interrupt(&self) {
        if self.interrupted.shutdown() {
            info!(kind = %self.kind(), job = self.name(), "interrupting executor");
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use futures::FutureExt;

    use crate::{
        common::Shutdown,
        executor::{ExecutorRegistry, StatusUpdateFn},
        model::{ImagePrePullJob, ImagePrePullSpec, NodeTaskPhase},
        transport::mock::RecordingLayer,
        wrapper::{JobWrapper, NodeTaskWrapper},
    };

    fn job(
        name: &str,
        concurrency: u32,
        nodes: &[&str],
    ) -> JobWrapper {
        JobWrapper::new(ImagePrePullJob::new(name, ImagePrePullSpec::new(&["nginx:latest"], concurrency), nodes).into())
    }

    fn recorder() -> (StatusUpdateFn, Arc<Mutex<Vec<NodeTaskWrapper>>>) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let update_fn: StatusUpdateFn = Arc::new(move |task: NodeTaskWrapper| {
            sink.lock().unwrap().push(task);
            async {}.boxed()
        });
        (update_fn, updates)
    }

    fn connected(nodes: &[&str]) -> HashSet<String> {
        nodes.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_not_connected() {
        let registry = ExecutorRegistry::new();
        let layer = Arc::new(RecordingLayer::default());
        let (update_fn, updates) = recorder();
        let (executor, present) = registry.get_or_create(job("j2", 1, &["n3"]), layer.clone(), update_fn);
        assert!(!present);

        executor.execute(&Shutdown::new(), &HashSet::new()).await;

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].phase(), NodeTaskPhase::Failure);
        assert!(updates[0].reason().unwrap().contains("not connected"));
        assert!(layer.sent_resources().is_empty());
        assert_eq!(executor.in_flight(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure() {
        let registry = ExecutorRegistry::new();
        let (update_fn, updates) = recorder();
        let (executor, _) = registry.get_or_create(job("j3", 1, &["n4"]), RecordingLayer::failing("transport down"), update_fn);

        executor.execute(&Shutdown::new(), &connected(&["n4"])).await;

        let updates = updates.lock().unwrap();
        assert_eq!(updates[0].phase(), NodeTaskPhase::Failure);
        let reason = updates[0].reason().unwrap();
        assert!(reason.contains("failed to send"), "{}", reason);
        assert!(reason.contains("transport down"), "{}", reason);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let registry = ExecutorRegistry::new();
        let layer = Arc::new(RecordingLayer::default());
        let (update_fn, updates) = recorder();
        let nodes = ["n1", "n2", "n3", "n4", "n5"];
        let (executor, _) = registry.get_or_create(job("j5", 2, &nodes), layer.clone(), update_fn);

        let handle = {
            let executor = executor.clone();
            let connected = connected(&nodes);
            tokio::spawn(async move { executor.execute(&Shutdown::new(), &connected).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.in_flight(), 2);
        assert_eq!(layer.sent_resources().len(), 2);
        assert_eq!(updates.lock().unwrap().len(), 2);

        executor.finish_task();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(layer.sent_resources().len(), 3);
        assert_eq!(executor.in_flight(), 2);
        assert!(layer.sent_resources()[2].ends_with("/node/n3"));

        for _ in 0..4 {
            executor.finish_task();
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(executor.in_flight() <= 2);
        }
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(layer.sent_resources().len(), 5);
        assert!(updates.lock().unwrap().iter().all(|t| t.phase() == NodeTaskPhase::InProgress));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_stops_dispatch() {
        let registry = ExecutorRegistry::new();
        let layer = Arc::new(RecordingLayer::default());
        let (update_fn, _) = recorder();
        let nodes = ["n1", "n2", "n3", "n4"];
        let (executor, _) = registry.get_or_create(job("j6", 2, &nodes), layer.clone(), update_fn);

        let handle = {
            let executor = executor.clone();
            let connected = connected(&nodes);
            tokio::spawn(async move { executor.execute(&Shutdown::new(), &connected).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(layer.sent_resources().len(), 2);

        executor.interrupt();
        assert!(executor.is_interrupted());
        registry.remove(executor.kind(), executor.name());
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        executor.finish_task();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(layer.sent_resources().len(), 2);
    }

    #[tokio::test]
    async fn test_skips_non_pending_tasks() {
        let mut raw = ImagePrePullJob::new("j7", ImagePrePullSpec::new(&["nginx:latest"], 1), &["n1", "n2"]);
        raw.status.node_status[0].phase = NodeTaskPhase::Successful;
        let registry = ExecutorRegistry::new();
        let layer = Arc::new(RecordingLayer::default());
        let (update_fn, updates) = recorder();
        let (executor, _) = registry.get_or_create(JobWrapper::new(raw.into()), layer.clone(), update_fn);

        let handle = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&Shutdown::new(), &connected(&["n1", "n2"])).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(layer.sent_resources(), vec!["operations/v1alpha2/imageprepulljob/j7/node/n2".to_string()]);
        assert_eq!(updates.lock().unwrap()[0].node_name(), "n2");

        executor.finish_task();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let registry = ExecutorRegistry::new();
        let layer = Arc::new(RecordingLayer::default());
        let (update_fn, _) = recorder();
        let (executor, _) = registry.get_or_create(job("j8", 1, &["n1", "n2"]), layer.clone(), update_fn);

        let ctx = Shutdown::new();
        let handle = {
            let executor = executor.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { executor.execute(&ctx, &connected(&["n1", "n2"])).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(layer.sent_resources().len(), 1);
        assert_eq!(executor.in_flight(), 1);
    }
}
