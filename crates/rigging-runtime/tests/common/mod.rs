//! In-memory provider that records every call.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;
use rigging_common::types::{Operation, ResourceKind};
use rigging_common::value::Value;
use rigging_runtime::provider::{Attributes, EvaluatedConfig, OperationContext, Provider, ProviderSet};

/// Records `"<operation> <resource>"` for every call, in call order.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    transient: Mutex<HashMap<String, u32>>,
    retry_safe: AtomicBool,
    skip_unchanged: AtomicBool,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
    cancel_after: Mutex<Option<(String, Arc<AtomicBool>)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every operation on `resource` fails permanently.
    pub fn fail(&self, resource: &str) {
        let _ = self.failing.lock().unwrap().insert(resource.into());
    }

    /// Operations on `resource` succeed again.
    pub fn heal(&self, resource: &str) {
        let _ = self.failing.lock().unwrap().remove(resource);
    }

    /// The next `times` operations on `resource` fail with a 503.
    pub fn flake(&self, resource: &str, times: u32) {
        let _ = self.transient.lock().unwrap().insert(resource.into(), times);
    }

    pub fn set_retry_safe(&self, safe: bool) {
        self.retry_safe.store(safe, Ordering::SeqCst);
    }

    pub fn set_skip_unchanged(&self, skip: bool) {
        self.skip_unchanged.store(skip, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Raises `flag` when an operation on `resource` starts.
    pub fn cancel_when(&self, resource: &str, flag: Arc<AtomicBool>) {
        *self.cancel_after.lock().unwrap() = Some((resource.into(), flag));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Resource names in call order, for calls of `operation`.
    pub fn order(&self, operation: Operation) -> Vec<String> {
        let prefix = format!("{operation} ");
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Registers this recorder for every resource kind.
    pub fn providers(self: &Arc<Self>) -> ProviderSet {
        let provider: Arc<dyn Provider> = Arc::clone(self) as Arc<dyn Provider>;
        [
            ResourceKind::Cluster,
            ResourceKind::Namespace,
            ResourceKind::Secret,
            ResourceKind::HelmRelease,
            ResourceKind::CustomResource,
            ResourceKind::Deployment,
            ResourceKind::ShellCommand,
            ResourceKind::ModelKey,
        ]
        .into_iter()
        .fold(ProviderSet::new(), |set, kind| set.with(kind, Arc::clone(&provider)))
    }

    async fn call(&self, operation: Operation, ctx: &OperationContext<'_>) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{operation} {}", ctx.name));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some((resource, flag)) = self.cancel_after.lock().unwrap().as_ref() {
            if resource == ctx.name {
                flag.store(true, Ordering::SeqCst);
            }
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let _ = self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(ctx.name) {
            return Err(RiggingError::OperationFailed {
                resource: ctx.name.to_string(),
                operation,
                message: "injected failure".into(),
            });
        }
        let mut transient = self.transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(ctx.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RiggingError::Http {
                    status: Some(503),
                    message: "service unavailable".into(),
                });
            }
        }
        Ok(())
    }
}

/// Echoes every configured field back as an attribute, plus an `id`.
fn echo(ctx: &OperationContext<'_>) -> Attributes {
    let mut attrs: Attributes = ctx
        .config
        .fields()
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    let _ = attrs.insert(
        "id".into(),
        Sensitive::plain(Value::from(format!("id-{}", ctx.name))),
    );
    attrs
}

#[async_trait]
impl Provider for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn retry_safe(&self, _operation: Operation, _config: &EvaluatedConfig) -> bool {
        self.retry_safe.load(Ordering::SeqCst)
    }

    fn skip_unchanged(&self) -> bool {
        self.skip_unchanged.load(Ordering::SeqCst)
    }

    async fn create(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        self.call(Operation::Create, ctx).await?;
        Ok(echo(ctx))
    }

    async fn update(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        self.call(Operation::Update, ctx).await?;
        Ok(echo(ctx))
    }

    async fn delete(&self, ctx: &OperationContext<'_>) -> Result<()> {
        self.call(Operation::Delete, ctx).await
    }
}
