//! Execution plans.
//!
//! A plan is a list of batches derived from the dependency graph's
//! levels. Every step of a batch may run concurrently; a step names the
//! resources whose success it waits on. Plans are built once and never
//! modified afterwards.

use std::collections::BTreeMap;

use rigging_common::error::{Result, RiggingError};
use rigging_common::types::{PlanKind, ResourceKind};
use serde::Serialize;

use crate::graph::DependencyGraph;

/// One resource operation inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resources that must succeed before this step may run:
    /// dependencies on apply, dependents on destroy.
    pub waits_on: Vec<String>,
}

/// Ordered batches of resource operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    kind: PlanKind,
    batches: Vec<Vec<PlannedStep>>,
}

impl ExecutionPlan {
    /// Builds a plan over `graph`.
    ///
    /// Apply runs dependencies first. Destroy runs the apply batches in
    /// exact reverse, each batch reversed as well, so dependents go first.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Cycle` if the graph is cyclic and
    /// `RiggingError::NotFound` if `kinds` lacks a resource of the graph.
    pub fn build(
        kind: PlanKind,
        graph: &DependencyGraph,
        kinds: &BTreeMap<String, ResourceKind>,
    ) -> Result<Self> {
        let levels = graph.levels()?;
        let step = |name: String| -> Result<PlannedStep> {
            let kind_of = kinds.get(&name).copied().ok_or_else(|| RiggingError::NotFound {
                kind: "resource",
                id: name.clone(),
            })?;
            let waits_on = match kind {
                PlanKind::Apply => graph.dependencies_of(&name),
                PlanKind::Destroy => graph.dependents_of(&name),
            };
            Ok(PlannedStep {
                name,
                kind: kind_of,
                waits_on,
            })
        };

        let batches = match kind {
            PlanKind::Apply => levels
                .into_iter()
                .map(|level| level.into_iter().map(&step).collect())
                .collect::<Result<Vec<Vec<_>>>>()?,
            PlanKind::Destroy => levels
                .into_iter()
                .rev()
                .map(|level| level.into_iter().rev().map(&step).collect())
                .collect::<Result<Vec<Vec<_>>>>()?,
        };

        let plan = Self { kind, batches };
        tracing::debug!(kind = %kind, batches = plan.batches.len(), steps = plan.len(), "plan built");
        Ok(plan)
    }

    /// Direction of the plan.
    #[must_use]
    pub const fn kind(&self) -> PlanKind {
        self.kind
    }

    /// Batches in execution order.
    #[must_use]
    pub fn batches(&self) -> &[Vec<PlannedStep>] {
        &self.batches
    }

    /// All steps, batch by batch.
    pub fn steps(&self) -> impl Iterator<Item = &PlannedStep> {
        self.batches.iter().flatten()
    }

    /// Resource names in the order a sequential run would use.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.steps().map(|s| s.name.as_str()).collect()
    }

    /// Total number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Returns whether the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
