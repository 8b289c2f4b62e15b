//! Static analysis and validation of the parsed AST.
//!
//! Checks for duplicate names, reserved names, self-dependencies and
//! parameter references before the stack is planned. References to
//! other resources are checked by the resolver.

use std::collections::HashSet;

use rigging_common::constants::CONFIG_NAMESPACE;
use rigging_common::error::{Result, RiggingError};

use super::ast::StackFile;
use crate::expr::{Expr, Reference};

/// Validates a parsed stack file for semantic correctness.
///
/// # Checks performed
///
/// 1. No duplicate resource, parameter, or output names.
/// 2. No resource is named `config`.
/// 3. No resource lists itself in `DEPENDS_ON`.
/// 4. Parameter defaults are literals.
/// 5. Every `${config.<name>}` names a declared parameter.
///
/// # Errors
///
/// Returns an error if any semantic check fails.
pub fn validate(file: &StackFile) -> Result<()> {
    tracing::debug!("validating stack file");
    check_duplicates(file)?;
    check_reserved_names(file)?;
    check_self_dependencies(file)?;
    check_param_defaults(file)?;
    check_param_references(file)?;
    Ok(())
}

fn check_unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(RiggingError::Config {
                message: format!("duplicate {what} name: \"{name}\""),
            });
        }
    }
    Ok(())
}

fn check_duplicates(file: &StackFile) -> Result<()> {
    check_unique("resource", file.resources.iter().map(|r| r.name.as_str()))?;
    check_unique("parameter", file.params.iter().map(|p| p.name.as_str()))?;
    check_unique("output", file.outputs.iter().map(|o| o.name.as_str()))
}

fn check_reserved_names(file: &StackFile) -> Result<()> {
    match file.resources.iter().find(|r| r.name == CONFIG_NAMESPACE) {
        Some(res) => Err(RiggingError::InvalidResource {
            resource: res.name.clone(),
            message: format!("\"{CONFIG_NAMESPACE}\" is reserved for parameter references"),
        }),
        None => Ok(()),
    }
}

fn check_self_dependencies(file: &StackFile) -> Result<()> {
    match file
        .resources
        .iter()
        .find(|r| r.depends_on.contains(&r.name))
    {
        Some(res) => Err(RiggingError::Cycle {
            cycle: vec![res.name.clone(), res.name.clone()],
        }),
        None => Ok(()),
    }
}

fn check_param_defaults(file: &StackFile) -> Result<()> {
    for param in &file.params {
        if param.default.as_ref().is_some_and(|d| !d.is_literal()) {
            return Err(RiggingError::Config {
                message: format!(
                    "default of parameter \"{}\" must not contain references",
                    param.name
                ),
            });
        }
    }
    Ok(())
}

fn check_param_references(file: &StackFile) -> Result<()> {
    let declared: HashSet<&str> = file.params.iter().map(|p| p.name.as_str()).collect();

    let resources = file
        .resources
        .iter()
        .flat_map(|r| r.properties.values().map(move |e| (r.name.as_str(), e)));
    let outputs = file.outputs.iter().map(|o| (o.name.as_str(), &o.value));

    for (referrer, expr) in resources.chain(outputs) {
        check_expr_params(referrer, expr, &declared)?;
    }
    Ok(())
}

fn check_expr_params(referrer: &str, expr: &Expr, declared: &HashSet<&str>) -> Result<()> {
    for reference in expr.references() {
        if let Reference::Param(name) = reference {
            if !declared.contains(name.as_str()) {
                return Err(RiggingError::UnresolvedReference {
                    referrer: referrer.to_string(),
                    kind: "parameter",
                    name: name.clone(),
                });
            }
        }
    }
    Ok(())
}
