//! Engine facade: parameters, recorded state, execution and outputs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use rigging_common::config::RiggingConfig;
use rigging_common::constants::state_file;
use rigging_common::error::Result;
use rigging_common::secret::Sensitive;
use rigging_common::types::{PlanKind, RunId};
use rigging_common::value::Value;
use rigging_compose::{ExecutionPlan, Stack};

use crate::executor::{Executor, Outcome, RunReport};
use crate::outputs::{self, OutputReport};
use crate::params::{ParamSources, Params, resolve_params};
use crate::provider::ProviderSet;
use crate::retry::RetryPolicy;
use crate::state::{ResourceState, StackState, StoredValue, load_state, save_state};

/// Result of `apply`: per-resource outcomes and the exported outputs.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Per-resource outcomes.
    pub report: RunReport,
    /// Outputs computed from the run.
    pub outputs: OutputReport,
}

/// Runs stacks against the configured providers and persists their state.
pub struct Engine {
    config: RiggingConfig,
    providers: ProviderSet,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    /// Creates an engine backed by the standard providers.
    #[must_use]
    pub fn new(config: RiggingConfig) -> Self {
        let providers = ProviderSet::standard(&config);
        Self::with_providers(config, providers)
    }

    /// Creates an engine with a custom provider set.
    #[must_use]
    pub fn with_providers(config: RiggingConfig, providers: ProviderSet) -> Self {
        Self {
            config,
            providers,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that cancels the current run before its next batch.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RiggingConfig {
        &self.config
    }

    /// Where state for `stack` is stored.
    #[must_use]
    pub fn state_path(&self, stack: &str) -> PathBuf {
        state_file(&self.config.state_dir, stack)
    }

    /// Loads the recorded state of `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file exists but cannot be read.
    pub fn state(&self, stack: &str) -> Result<StackState> {
        load_state(&self.state_path(stack), stack)
    }

    /// Builds the plan `kind` for `stack` without running it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be planned.
    pub fn plan(&self, stack: &Stack, kind: PlanKind) -> Result<ExecutionPlan> {
        stack.plan(kind)
    }

    fn executor(&self) -> Executor {
        Executor::new(
            self.providers.clone(),
            RetryPolicy::from(&self.config.retry),
            self.config.jobs,
        )
        .with_cancel_flag(self.cancel_flag())
    }

    fn params(stack: &Stack, sources: &ParamSources) -> Result<Arc<Params>> {
        resolve_params(stack.params(), sources).map(Arc::new)
    }

    /// Creates or updates every resource of `stack`, then exports its
    /// outputs and persists state.
    ///
    /// Resources that fail keep their previously recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error for missing parameters, unreadable state, or a
    /// failure to persist state. Resource failures are reported in the
    /// returned [`RunReport`].
    pub async fn apply(&self, stack: &Stack, sources: &ParamSources) -> Result<ApplyOutcome> {
        let params = Self::params(stack, sources)?;
        let path = self.state_path(stack.name());
        let mut state = load_state(&path, stack.name())?;

        let report = self
            .executor()
            .apply(stack, Arc::clone(&params), &state.priors())
            .await?;
        let outputs = outputs::export(stack, params, &report);

        for result in &report.results {
            if let Outcome::Succeeded {
                attributes,
                fingerprint,
                ..
            } = &result.outcome
            {
                let _ = state.resources.insert(
                    result.name.clone(),
                    ResourceState::new(result.kind, attributes, fingerprint.clone()),
                );
            }
        }
        for orphan in state
            .resources
            .keys()
            .filter(|name| stack.resource(name).is_none())
        {
            tracing::warn!(resource = %orphan, "recorded resource is no longer declared");
        }
        state.outputs = outputs
            .values
            .iter()
            .map(|(name, value)| (name.clone(), StoredValue::from(value)))
            .collect();
        state.last_run = Some(report.run_id.clone());
        save_state(&path, &state)?;

        tracing::info!(stack = %stack.name(), summary = %report, "apply finished");
        Ok(ApplyOutcome { report, outputs })
    }

    /// Deletes every resource of `stack`, dependents first, and removes
    /// the deleted resources from the recorded state. Once nothing remains
    /// recorded, every output is dropped as well.
    ///
    /// # Errors
    ///
    /// Same as [`apply`](Self::apply).
    pub async fn destroy(&self, stack: &Stack, sources: &ParamSources) -> Result<RunReport> {
        let params = Self::params(stack, sources)?;
        let path = self.state_path(stack.name());
        let mut state = load_state(&path, stack.name())?;

        let report = self
            .executor()
            .destroy(stack, params, &state.priors())
            .await?;

        let removed = report.succeeded();
        for name in &removed {
            let _ = state.resources.remove(*name);
        }
        if state.resources.is_empty() {
            state.outputs.clear();
        } else {
            for output in stack.outputs() {
                if output.depends_on.iter().any(|r| removed.contains(&r.as_str())) {
                    let _ = state.outputs.remove(&output.name);
                }
            }
        }
        state.last_run = Some(report.run_id.clone());
        save_state(&path, &state)?;

        tracing::info!(stack = %stack.name(), summary = %report, "destroy finished");
        Ok(report)
    }

    /// Outputs recorded by the last apply of `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub fn outputs(&self, stack: &str) -> Result<BTreeMap<String, Sensitive<Value>>> {
        Ok(self
            .state(stack)?
            .outputs
            .iter()
            .map(|(name, value)| (name.clone(), Sensitive::from(value)))
            .collect())
    }

    /// Identifier of the last run recorded for `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub fn last_run(&self, stack: &str) -> Result<Option<RunId>> {
        Ok(self.state(stack)?.last_run)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state_dir", &self.config.state_dir)
            .field("jobs", &self.config.jobs)
            .finish_non_exhaustive()
    }
}
