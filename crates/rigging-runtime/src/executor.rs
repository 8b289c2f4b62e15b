//! Topological executor.
//!
//! Runs an [`ExecutionPlan`] batch by batch. Steps of one batch run
//! concurrently, bounded by a semaphore. A step only starts when every
//! resource it waits on succeeded; otherwise it is skipped, which in turn
//! skips everything waiting on it. Independent branches always run to
//! completion. Each resource's outcome lives in its own slot and is
//! written exactly once.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use rigging_common::error::{Result, RiggingError};
use rigging_common::types::{Operation, PlanKind, ResourceKind, RunId};
use rigging_compose::plan::PlannedStep;
use rigging_compose::{ExecutionPlan, Stack};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::params::Params;
use crate::provider::{Attributes, EvaluatedConfig, OperationContext, Provider, ProviderSet};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::scope::Scope;

/// What a previous run recorded for a resource.
#[derive(Debug, Clone)]
pub struct Prior {
    /// Attributes returned by the last successful create or update.
    pub attributes: Arc<Attributes>,
    /// Fingerprint of the configuration that produced them.
    pub fingerprint: Option<String>,
}

/// Final outcome of one resource in a run.
#[derive(Debug)]
pub enum Outcome {
    /// The operation completed.
    Succeeded {
        /// Operation that was performed.
        operation: Operation,
        /// Whether an external call was made.
        changed: bool,
        /// Resulting attributes (empty after a delete).
        attributes: Arc<Attributes>,
        /// Fingerprint of the evaluated configuration.
        fingerprint: Option<String>,
    },
    /// The operation failed.
    Failed {
        /// Operation that was attempted.
        operation: Operation,
        /// Why it failed.
        error: RiggingError,
    },
    /// Not attempted because a resource it waits on did not succeed.
    Skipped {
        /// The resources that did not succeed.
        blocked_by: Vec<String>,
    },
    /// Not attempted because the run was cancelled.
    Cancelled,
}

impl Outcome {
    /// Returns whether the operation completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Short label for reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one resource, in plan order.
#[derive(Debug)]
pub struct ResourceResult {
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// What happened.
    pub outcome: Outcome,
}

/// Structured summary of a run.
#[derive(Debug)]
pub struct RunReport {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Direction of the run.
    pub kind: PlanKind,
    /// Per-resource outcomes, in plan order.
    pub results: Vec<ResourceResult>,
}

impl RunReport {
    /// Looks up the outcome of `name`.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.results
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }

    fn names(&self, pred: impl Fn(&Outcome) -> bool) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| pred(&r.outcome))
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Resources that completed.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.names(Outcome::is_success)
    }

    /// Resources whose operation failed.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.names(|o| matches!(o, Outcome::Failed { .. }))
    }

    /// Resources skipped because of an upstream failure.
    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.names(|o| matches!(o, Outcome::Skipped { .. }))
    }

    /// Resources not attempted because the run was cancelled.
    #[must_use]
    pub fn cancelled(&self) -> Vec<&str> {
        self.names(|o| matches!(o, Outcome::Cancelled))
    }

    /// Returns whether every resource completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }

    /// The `PartialFailure` summary, if anything did not complete.
    #[must_use]
    pub fn partial_failure(&self) -> Option<RiggingError> {
        if self.is_success() {
            return None;
        }
        Some(RiggingError::PartialFailure {
            succeeded: self.succeeded().len(),
            failed: self.failed().len(),
            skipped: self.skipped().len() + self.cancelled().len(),
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} succeeded, {} failed, {} skipped, {} cancelled",
            self.kind,
            self.run_id,
            self.succeeded().len(),
            self.failed().len(),
            self.skipped().len(),
            self.cancelled().len()
        )
    }
}

/// SHA-256 over a resource's kind and evaluated configuration, including
/// secret values.
#[must_use]
pub fn fingerprint(config: &EvaluatedConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config.kind().as_str().as_bytes());
    for (key, value) in config.fields() {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.expose().to_json().to_string().as_bytes());
        if value.is_secret() {
            hasher.update(b"!");
        }
    }
    format!("{:x}", hasher.finalize())
}

/// One operation ready to run on a worker.
struct Job {
    provider: Arc<dyn Provider>,
    name: String,
    operation: Operation,
    config: EvaluatedConfig,
    prior: Option<Arc<Attributes>>,
    fingerprint: Option<String>,
    policy: RetryPolicy,
}

impl Job {
    async fn run(self) -> Outcome {
        let label = format!("{} {}", self.operation, self.name);
        let provider = &*self.provider;
        let name = self.name.as_str();
        let config = &self.config;
        let prior = self.prior.as_deref();
        let operation = self.operation;

        tracing::info!(resource = %name, operation = %operation, provider = provider.name(), "starting");
        let result = retry_with_backoff(&self.policy, &label, move || async move {
            let ctx = OperationContext {
                name,
                config,
                prior,
            };
            match operation {
                Operation::Create => provider.create(&ctx).await,
                Operation::Update => provider.update(&ctx).await,
                Operation::Delete => provider.delete(&ctx).await.map(|()| Attributes::new()),
            }
        })
        .await;

        match result {
            Ok(attributes) => {
                tracing::info!(resource = %name, operation = %operation, "completed");
                Outcome::Succeeded {
                    operation,
                    changed: true,
                    attributes: Arc::new(attributes),
                    fingerprint: self.fingerprint,
                }
            }
            Err(error) => {
                tracing::error!(resource = %name, operation = %operation, error = %error, "failed");
                Outcome::Failed { operation, error }
            }
        }
    }
}

/// A prepared step: either work to run or an outcome known up front.
enum Prepared {
    Run(Box<Job>),
    Done(Outcome),
}

/// Executes plans against a set of providers.
#[derive(Debug, Clone)]
pub struct Executor {
    providers: ProviderSet,
    retry: RetryPolicy,
    jobs: usize,
    cancel: Arc<AtomicBool>,
}

impl Executor {
    /// Creates an executor running at most `jobs` operations at once.
    #[must_use]
    pub fn new(providers: ProviderSet, retry: RetryPolicy, jobs: usize) -> Self {
        Self {
            providers,
            retry,
            jobs: jobs.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares `flag` as the cancellation signal.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// The cancellation signal, checked between batches.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Creates or updates every resource of `stack`, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stack cannot be planned. Operation
    /// failures are reported per resource in the [`RunReport`].
    pub async fn apply(
        &self,
        stack: &Stack,
        params: Arc<Params>,
        prior: &BTreeMap<String, Prior>,
    ) -> Result<RunReport> {
        self.run(stack, PlanKind::Apply, params, prior).await
    }

    /// Deletes every resource of `stack`, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stack cannot be planned.
    pub async fn destroy(
        &self,
        stack: &Stack,
        params: Arc<Params>,
        prior: &BTreeMap<String, Prior>,
    ) -> Result<RunReport> {
        self.run(stack, PlanKind::Destroy, params, prior).await
    }

    async fn run(
        &self,
        stack: &Stack,
        kind: PlanKind,
        params: Arc<Params>,
        prior: &BTreeMap<String, Prior>,
    ) -> Result<RunReport> {
        let plan = stack.plan(kind)?;
        let run_id = RunId::generate();
        let span = tracing::info_span!("run", run_id = %run_id, stack = %stack.name(), kind = %kind);
        self.execute(stack, &plan, params, prior)
            .instrument(span)
            .await
            .map(|results| RunReport {
                run_id,
                kind,
                results,
            })
    }

    async fn execute(
        &self,
        stack: &Stack,
        plan: &ExecutionPlan,
        params: Arc<Params>,
        prior: &BTreeMap<String, Prior>,
    ) -> Result<Vec<ResourceResult>> {
        tracing::info!(steps = plan.len(), batches = plan.batches().len(), jobs = self.jobs, "run started");
        let slots: HashMap<&str, OnceLock<Outcome>> = plan
            .steps()
            .map(|s| (s.name.as_str(), OnceLock::new()))
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.jobs));

        let mut scope = Scope::new(params);
        if plan.kind() == PlanKind::Destroy {
            for (name, recorded) in prior {
                scope.insert(name.clone(), Arc::clone(&recorded.attributes));
            }
        }

        for (index, batch) in plan.batches().iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!(batch = index, "run cancelled, remaining steps not started");
                break;
            }
            tracing::debug!(batch = index, steps = batch.len(), "batch started");

            let mut tasks = JoinSet::new();
            for step in batch {
                let blocked_by: Vec<String> = step
                    .waits_on
                    .iter()
                    .filter(|w| !slots.get(w.as_str()).and_then(OnceLock::get).is_some_and(Outcome::is_success))
                    .cloned()
                    .collect();
                if !blocked_by.is_empty() {
                    tracing::warn!(resource = %step.name, blocked_by = ?blocked_by, "skipped");
                    record(&slots, &step.name, Outcome::Skipped { blocked_by });
                    continue;
                }

                match self.prepare(stack, plan.kind(), step, &scope, prior.get(&step.name)) {
                    Prepared::Done(outcome) => {
                        if let Outcome::Succeeded { attributes, .. } = &outcome {
                            if plan.kind() == PlanKind::Apply {
                                scope.insert(step.name.clone(), Arc::clone(attributes));
                            }
                        }
                        record(&slots, &step.name, outcome);
                    }
                    Prepared::Run(job) => {
                        let semaphore = Arc::clone(&semaphore);
                        let name = step.name.clone();
                        let _ = tasks.spawn(
                            async move {
                                let outcome = match semaphore.acquire_owned().await {
                                    Ok(_permit) => job.run().await,
                                    Err(_) => Outcome::Cancelled,
                                };
                                (name, outcome)
                            }
                            .in_current_span(),
                        );
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, outcome)) => {
                        if plan.kind() == PlanKind::Apply {
                            if let Outcome::Succeeded { attributes, .. } = &outcome {
                                scope.insert(name.clone(), Arc::clone(attributes));
                            }
                        }
                        record(&slots, &name, outcome);
                    }
                    Err(e) => tracing::error!(error = %e, "worker task aborted"),
                }
            }

            for step in batch {
                if slots.get(step.name.as_str()).and_then(OnceLock::get).is_none() {
                    let operation = operation_for(plan.kind(), prior.contains_key(&step.name));
                    let error = RiggingError::OperationFailed {
                        resource: step.name.clone(),
                        operation,
                        message: "worker task aborted".into(),
                    };
                    record(&slots, &step.name, Outcome::Failed { operation, error });
                }
            }
        }

        let mut slots = slots;
        let results: Vec<ResourceResult> = plan
            .steps()
            .map(|step| ResourceResult {
                name: step.name.clone(),
                kind: step.kind,
                outcome: slots
                    .remove(step.name.as_str())
                    .and_then(OnceLock::into_inner)
                    .unwrap_or(Outcome::Cancelled),
            })
            .collect();
        tracing::info!(
            succeeded = results.iter().filter(|r| r.outcome.is_success()).count(),
            total = results.len(),
            "run finished"
        );
        Ok(results)
    }

    fn prepare(
        &self,
        stack: &Stack,
        kind: PlanKind,
        step: &PlannedStep,
        scope: &Scope,
        prior: Option<&Prior>,
    ) -> Prepared {
        let operation = operation_for(kind, prior.is_some());
        let fail = |error: RiggingError| Prepared::Done(Outcome::Failed { operation, error });

        let Some(descriptor) = stack.resource(&step.name) else {
            return fail(RiggingError::NotFound {
                kind: "resource",
                id: step.name.clone(),
            });
        };
        let provider = match self.providers.get(step.kind) {
            Ok(p) => p,
            Err(e) => return fail(e),
        };
        let config = match scope.evaluate_config(&step.name, descriptor.config()) {
            Ok(config) => config,
            Err(e) if kind == PlanKind::Destroy && prior.is_none() => {
                tracing::info!(resource = %step.name, error = %e, "no recorded state, treating as absent");
                return Prepared::Done(Outcome::Succeeded {
                    operation,
                    changed: false,
                    attributes: Arc::new(Attributes::new()),
                    fingerprint: None,
                });
            }
            Err(e) => return fail(e),
        };
        let fingerprint = fingerprint(&config);

        if let (Operation::Update, Some(recorded)) = (operation, prior) {
            if provider.skip_unchanged() && recorded.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                tracing::info!(resource = %step.name, "unchanged");
                return Prepared::Done(Outcome::Succeeded {
                    operation,
                    changed: false,
                    attributes: Arc::clone(&recorded.attributes),
                    fingerprint: Some(fingerprint),
                });
            }
        }

        let policy = if provider.retry_safe(operation, &config) {
            self.retry.clone()
        } else {
            RetryPolicy::once()
        };
        Prepared::Run(Box::new(Job {
            provider,
            name: step.name.clone(),
            operation,
            config,
            prior: prior.map(|p| Arc::clone(&p.attributes)),
            fingerprint: (operation != Operation::Delete).then_some(fingerprint),
            policy,
        }))
    }
}

const fn operation_for(kind: PlanKind, recorded: bool) -> Operation {
    match (kind, recorded) {
        (PlanKind::Destroy, _) => Operation::Delete,
        (PlanKind::Apply, true) => Operation::Update,
        (PlanKind::Apply, false) => Operation::Create,
    }
}

fn record(slots: &HashMap<&str, OnceLock<Outcome>>, name: &str, outcome: Outcome) {
    match slots.get(name) {
        Some(slot) => {
            if slot.set(outcome).is_err() {
                tracing::error!(resource = %name, "outcome already recorded");
            }
        }
        None => tracing::error!(resource = %name, "no slot for resource"),
    }
}
