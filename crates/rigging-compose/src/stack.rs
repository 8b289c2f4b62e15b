//! A parsed, resolved and checked deployment unit.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use rigging_common::constants::stack_name;
use rigging_common::error::{Result, RiggingError};
use rigging_common::types::{PlanKind, ResourceKind};

use crate::descriptor::ResourceDescriptor;
use crate::expr::Expr;
use crate::graph::DependencyGraph;
use crate::parser::ast::{OutputDecl, ParamDecl};
use crate::plan::ExecutionPlan;
use crate::resolver;

/// A declared output with the resources it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDef {
    /// Output name.
    pub name: String,
    /// Whether the output is secret regardless of its inputs.
    pub secret: bool,
    /// Expression computing the output.
    pub value: Expr,
    /// Resources whose attributes the expression reads.
    pub depends_on: BTreeSet<String>,
}

/// One deployment unit: parameters, resources, outputs and the
/// dependency graph between resources.
///
/// Construction fails on any graph-level error, so a `Stack` that exists
/// can always be planned.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    params: Vec<ParamDecl>,
    resources: Vec<ResourceDescriptor>,
    outputs: Vec<OutputDef>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    graph: DependencyGraph,
}

impl Stack {
    /// Parses and checks a stack from `.rig` source text.
    ///
    /// # Errors
    ///
    /// Returns the first syntax, schema, reference, or cycle error.
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self> {
        let file = crate::parser::parse_stack(source)?;
        let resources = file
            .resources
            .iter()
            .map(ResourceDescriptor::from_decl)
            .collect::<Result<Vec<_>>>()?;
        Self::from_parts(name, file.params, resources, file.outputs)
    }

    /// Reads and parses a `.rig` file; the stack is named after the file stem.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| RiggingError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let stack = Self::parse(stack_name(path), &source)?;
        tracing::info!(
            stack = %stack.name,
            path = %path.display(),
            resources = stack.resources.len(),
            outputs = stack.outputs.len(),
            "stack loaded"
        );
        Ok(stack)
    }

    /// Assembles a stack from already-built descriptors.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate names, unresolved references, or a
    /// dependency cycle.
    pub fn from_parts(
        name: impl Into<String>,
        params: Vec<ParamDecl>,
        resources: Vec<ResourceDescriptor>,
        outputs: Vec<OutputDecl>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        if let Some(dup) = resources.iter().find(|r| !seen.insert(r.name())) {
            return Err(RiggingError::Config {
                message: format!("duplicate resource name: \"{}\"", dup.name()),
            });
        }

        let dependencies = resolver::resolve_dependencies(&resources)?;
        let declared: BTreeSet<&str> = resources.iter().map(ResourceDescriptor::name).collect();
        let outputs = outputs
            .into_iter()
            .map(|decl| {
                let depends_on = resolver::referenced_resources(&decl.value);
                resolver::check_declared(&decl.name, &depends_on, &declared)?;
                Ok(OutputDef {
                    name: decl.name,
                    secret: decl.secret,
                    value: decl.value,
                    depends_on,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let graph = DependencyGraph::build(
            resources.iter().map(ResourceDescriptor::name),
            &dependencies,
        )?;

        Ok(Self {
            name: name.into(),
            params,
            resources,
            outputs,
            dependencies,
            graph,
        })
    }

    /// Stack name (used for the state file).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters.
    #[must_use]
    pub fn params(&self) -> &[ParamDecl] {
        &self.params
    }

    /// Resources in declaration order.
    #[must_use]
    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    /// Looks up a resource by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.name() == name)
    }

    /// Declared outputs.
    #[must_use]
    pub fn outputs(&self) -> &[OutputDef] {
        &self.outputs
    }

    /// Explicit plus implicit dependencies of `name`.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(name)
    }

    /// The checked dependency graph.
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Builds an execution plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be ordered.
    pub fn plan(&self, kind: PlanKind) -> Result<ExecutionPlan> {
        let kinds: BTreeMap<String, ResourceKind> = self
            .resources
            .iter()
            .map(|r| (r.name().to_string(), r.kind()))
            .collect();
        ExecutionPlan::build(kind, &self.graph, &kinds)
    }
}
