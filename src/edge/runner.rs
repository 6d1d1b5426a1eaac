//! Per-kind action runner.
//!
//! A runner owns the kind's flow, one async function per action and a spec
//! decoder. Given the action named by a downstream message it walks the flow,
//! reporting every outcome, until an action pauses, fails without a failure
//! successor or the final action completes.

use std::{
    any::Any,
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use jsonschema::Validator;
use tracing::{debug, warn};

use crate::{
    EdgeTaskError, Result,
    common::{MemCache, Shutdown},
    edge::Reporter,
    flow::ActionFlow,
    model::{JobKind, KindSpec},
    wire::NodeTaskResource,
};

/// Outcome of one action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResponse {
    error: Option<String>,
    do_next: bool,
    extend: String,
}

impl ActionResponse {
    /// Success; the runner continues with the next action.
    pub fn next() -> Self {
        Self {
            error: None,
            do_next: true,
            extend: String::new(),
        }
    }

    /// Success, but the flow stops here until a later downstream message resumes it.
    pub fn pause() -> Self {
        Self {
            error: None,
            do_next: false,
            extend: String::new(),
        }
    }

    pub fn fail(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            do_next: false,
            extend: String::new(),
        }
    }

    pub fn with_extend(
        mut self,
        extend: impl Into<String>,
    ) -> Self {
        self.extend = extend.into();
        self
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn do_next(&self) -> bool {
        self.do_next
    }

    pub fn extend(&self) -> &str {
        &self.extend
    }
}

/// Input of one action invocation.
#[derive(Clone)]
pub struct ActionContext<S> {
    pub job_name: String,
    pub node_name: String,
    pub spec: Arc<S>,
    pub shutdown: Shutdown,
}

pub type ActionFn<S> = Arc<dyn Fn(ActionContext<S>) -> BoxFuture<'static, ActionResponse> + Send + Sync>;

/// Validates spec bytes against the kind's JSON schema, decodes them and
/// caches the result per job.
pub struct SpecSerializer<S> {
    validator: Arc<Validator>,
    cache: MemCache<(String, Vec<u8>), Arc<S>>,
}

impl<S: KindSpec> SpecSerializer<S> {
    pub fn new(cache_size: usize) -> Result<Self> {
        let validator = jsonschema::validator_for(&S::schema()).map_err(|e| EdgeTaskError::Config(format!("invalid {} schema: {}", S::KIND, e)))?;
        Ok(Self {
            validator: Arc::new(validator),
            cache: MemCache::new(cache_size),
        })
    }

    pub fn decode(
        &self,
        job_name: &str,
        bytes: &[u8],
    ) -> Result<Arc<S>> {
        self.cache.get_or_try_insert((job_name.to_string(), bytes.to_vec()), || {
            let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| EdgeTaskError::SpecDeserialize(e.to_string()))?;
            self.validator.validate(&value)?;
            let spec: S = serde_json::from_value(value).map_err(|e| EdgeTaskError::SpecDeserialize(e.to_string()))?;
            Ok(Arc::new(spec))
        })
    }
}

/// Kind-erased view of an [`ActionRunner`].
#[async_trait]
pub trait Runner: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn run_action(
        &self,
        shutdown: &Shutdown,
        job_name: &str,
        node_name: &str,
        action: &str,
        spec: &[u8],
    );
}

pub struct ActionRunner<S: KindSpec> {
    flow: &'static ActionFlow,
    actions: HashMap<String, ActionFn<S>>,
    serializer: SpecSerializer<S>,
    reporter: Reporter,
}

impl<S: KindSpec> ActionRunner<S> {
    pub fn new(
        reporter: Reporter,
        cache_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            flow: ActionFlow::for_kind(S::KIND),
            actions: HashMap::new(),
            serializer: SpecSerializer::new(cache_size)?,
            reporter,
        })
    }

    /// Registers the implementation of `name`.
    pub fn action<F>(
        mut self,
        name: &str,
        f: F,
    ) -> Self
    where
        F: Fn(ActionContext<S>) -> BoxFuture<'static, ActionResponse> + Send + Sync + 'static,
    {
        self.actions.insert(name.to_string(), Arc::new(f));
        self
    }

    async fn invoke(
        &self,
        name: &str,
        f: &ActionFn<S>,
        ctx: ActionContext<S>,
    ) -> ActionResponse {
        // A panicking action is reported like any other failure.
        match AssertUnwindSafe(async { f(ctx).await }).catch_unwind().await {
            Ok(resp) => resp,
            Err(panic) => ActionResponse::fail(format!("action {} panicked: {}", name, panic_message(&*panic))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl<S: KindSpec> Runner for ActionRunner<S> {
    fn kind(&self) -> JobKind {
        S::KIND
    }

    async fn run_action(
        &self,
        shutdown: &Shutdown,
        job_name: &str,
        node_name: &str,
        action: &str,
        spec: &[u8],
    ) {
        let resource = NodeTaskResource::new(S::KIND, job_name, node_name);

        let spec = match self.serializer.decode(job_name, spec) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(resource = %resource, action, error = %err, "rejecting job spec");
                self.reporter.report(&resource, action, &ActionResponse::fail(err)).await;
                return;
            }
        };
        let Some(mut current) = self.flow.find(action) else {
            let err = EdgeTaskError::UnknownAction {
                kind: S::KIND.to_string(),
                action: action.to_string(),
            };
            self.reporter.report(&resource, action, &ActionResponse::fail(err)).await;
            return;
        };

        loop {
            if shutdown.is_terminated() {
                debug!(resource = %resource, action = current.name(), "runner stopped before action");
                break;
            }
            let Some(f) = self.actions.get(current.name()) else {
                let resp = ActionResponse::fail(format!("action {} is not implemented for {}", current.name(), S::KIND));
                self.reporter.report(&resource, current.name(), &resp).await;
                break;
            };
            let ctx = ActionContext {
                job_name: job_name.to_string(),
                node_name: node_name.to_string(),
                spec: spec.clone(),
                shutdown: shutdown.clone(),
            };
            let resp = self.invoke(current.name(), f, ctx).await;
            self.reporter.report(&resource, current.name(), &resp).await;

            if resp.error().is_some() {
                match current.next(false) {
                    Some(next) => current = next,
                    None => break,
                }
            } else if !resp.do_next() || current.is_final() {
                break;
            } else {
                match current.next(true) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
    }
}
