//! Dependency inference from configuration references.
//!
//! A resource depends on every resource it lists in `DEPENDS_ON` and on
//! every resource whose attributes its configuration interpolates. Both
//! sets are resolved against the declared names here, before any graph
//! is built.

use std::collections::{BTreeMap, BTreeSet};

use rigging_common::error::{Result, RiggingError};

use crate::descriptor::ResourceDescriptor;
use crate::expr::Expr;
use crate::schema::ResourceConfig;

/// Returns the names of resources referenced by `expr`.
#[must_use]
pub fn referenced_resources(expr: &Expr) -> BTreeSet<String> {
    expr.references()
        .into_iter()
        .filter_map(|r| r.resource().map(str::to_string))
        .collect()
}

/// Returns the names of resources whose attributes `config` references.
#[must_use]
pub fn implicit_dependencies(config: &ResourceConfig) -> BTreeSet<String> {
    config
        .fields()
        .into_iter()
        .flat_map(|(_, expr)| referenced_resources(expr))
        .collect()
}

/// Checks that every name in `names` is declared.
///
/// # Errors
///
/// Returns `RiggingError::UnresolvedReference` naming the first unknown
/// resource.
pub fn check_declared(
    referrer: &str,
    names: &BTreeSet<String>,
    declared: &BTreeSet<&str>,
) -> Result<()> {
    match names.iter().find(|n| !declared.contains(n.as_str())) {
        Some(missing) => Err(RiggingError::UnresolvedReference {
            referrer: referrer.to_string(),
            kind: "resource",
            name: missing.clone(),
        }),
        None => Ok(()),
    }
}

/// Resolves the full dependency set of every descriptor.
///
/// The result maps each resource name to the union of its explicit and
/// implicit dependencies.
///
/// # Errors
///
/// Returns `RiggingError::UnresolvedReference` if any dependency names a
/// resource that is not declared.
pub fn resolve_dependencies(
    descriptors: &[ResourceDescriptor],
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let declared: BTreeSet<&str> = descriptors.iter().map(ResourceDescriptor::name).collect();

    descriptors
        .iter()
        .map(|descriptor| {
            let mut deps = descriptor.depends_on().clone();
            deps.extend(implicit_dependencies(descriptor.config()));
            check_declared(descriptor.name(), &deps, &declared)?;
            Ok((descriptor.name().to_string(), deps))
        })
        .collect()
}
