//! Abstract Syntax Tree types for the `.rig` stack language.

use std::collections::BTreeMap;

use rigging_common::types::ResourceKind;

use crate::expr::Expr;

/// Root AST node representing a complete `.rig` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFile {
    /// `PARAM` declarations.
    pub params: Vec<ParamDecl>,
    /// `RESOURCE` declarations, in source order.
    pub resources: Vec<ResourceDecl>,
    /// `OUTPUT` declarations.
    pub outputs: Vec<OutputDecl>,
}

/// A stack parameter: `PARAM token SECRET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    /// Parameter name, referenced as `${config.<name>}`.
    pub name: String,
    /// Whether supplied values are marked secret.
    pub secret: bool,
    /// Value used when none is supplied.
    pub default: Option<Expr>,
}

/// A resource declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDecl {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Logical name, unique within the stack.
    pub name: String,
    /// Names listed in `DEPENDS_ON`.
    pub depends_on: Vec<String>,
    /// Configuration properties.
    pub properties: BTreeMap<String, Expr>,
}

/// A named stack output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDecl {
    /// Output name.
    pub name: String,
    /// Whether the output is secret regardless of its inputs.
    pub secret: bool,
    /// Expression computing the output.
    pub value: Expr,
}
