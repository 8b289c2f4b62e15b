//! Output exporter.
//!
//! Runs after the executor has finished, so every result slot it reads is
//! final. An output is computed only if each resource it reads succeeded;
//! otherwise it is withheld with `DependencyFailed` and the rest of the
//! outputs are still exported.

use std::collections::BTreeMap;
use std::sync::Arc;

use rigging_common::error::RiggingError;
use rigging_common::secret::Sensitive;
use rigging_common::value::Value;
use rigging_compose::{OutputDef, Stack};

use crate::executor::{Outcome, RunReport};
use crate::params::Params;
use crate::scope::Scope;

/// Outputs computed after a run.
#[derive(Debug, Default)]
pub struct OutputReport {
    /// Exported values by output name.
    pub values: BTreeMap<String, Sensitive<Value>>,
    /// Why each missing output was withheld.
    pub withheld: Vec<RiggingError>,
}

impl OutputReport {
    /// Returns whether every declared output was exported.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.withheld.is_empty()
    }

    /// Names of the withheld outputs.
    #[must_use]
    pub fn withheld_names(&self) -> Vec<&str> {
        self.withheld
            .iter()
            .filter_map(|e| match e {
                RiggingError::DependencyFailed { output, .. } => Some(output.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Computes every output of `stack` from the results in `report`.
#[must_use]
pub fn export(stack: &Stack, params: Arc<Params>, report: &RunReport) -> OutputReport {
    let mut scope = Scope::new(params);
    for result in &report.results {
        if let Outcome::Succeeded { attributes, .. } = &result.outcome {
            scope.insert(result.name.clone(), Arc::clone(attributes));
        }
    }

    let mut exported = OutputReport::default();
    for output in stack.outputs() {
        match compute(output, &scope, report) {
            Ok(value) => {
                tracing::info!(output = %output.name, value = %value, "output exported");
                let _ = exported.values.insert(output.name.clone(), value);
            }
            Err(e) => {
                tracing::warn!(output = %output.name, error = %e, "output withheld");
                exported.withheld.push(e);
            }
        }
    }
    exported
}

fn compute(output: &OutputDef, scope: &Scope, report: &RunReport) -> Result<Sensitive<Value>, RiggingError> {
    let withheld = |resource: &str| RiggingError::DependencyFailed {
        output: output.name.clone(),
        resource: resource.to_string(),
    };
    if let Some(failed) = output
        .depends_on
        .iter()
        .find(|r| !report.outcome(r).is_some_and(Outcome::is_success))
    {
        return Err(withheld(failed));
    }
    let value = scope.evaluate(&output.value).map_err(|e| {
        tracing::debug!(output = %output.name, error = %e, "output evaluation failed");
        let resource = output.depends_on.iter().next().map_or("", String::as_str);
        withheld(resource)
    })?;
    Ok(if output.secret { value.into_secret() } else { value })
}
