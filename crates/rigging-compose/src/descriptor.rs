//! Immutable resource descriptors.

use std::collections::BTreeSet;

use rigging_common::error::Result;
use rigging_common::types::ResourceKind;

use crate::parser::ast::ResourceDecl;
use crate::schema::ResourceConfig;

/// A declared resource: kind, logical name, typed configuration and
/// explicit dependencies.
///
/// Descriptors only refer to each other by name; the names are resolved
/// when the stack's dependency graph is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    name: String,
    config: ResourceConfig,
    depends_on: BTreeSet<String>,
}

impl ResourceDescriptor {
    /// Creates a descriptor.
    pub fn new<I, S>(name: impl Into<String>, config: ResourceConfig, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            config,
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a descriptor from a parsed declaration.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::InvalidResource` if the properties do not
    /// match the kind's schema.
    pub fn from_decl(decl: &ResourceDecl) -> Result<Self> {
        let config = ResourceConfig::from_decl(decl)?;
        Ok(Self::new(decl.name.clone(), config, decl.depends_on.iter().cloned()))
    }

    /// Logical name, unique within the stack.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.config.kind()
    }

    /// Typed, unevaluated configuration.
    #[must_use]
    pub const fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Names listed in `DEPENDS_ON`.
    #[must_use]
    pub const fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }
}
