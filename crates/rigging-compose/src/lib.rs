//! # rigging-compose
//!
//! Parser and planner for the `.rig` stack language.
//!
//! Handles:
//! - **Parser**: Lexing, AST construction, and validation of `.rig` files.
//! - **Expr**: Property expressions and `${...}` interpolation.
//! - **Schema**: Typed configuration per resource kind.
//! - **Resolver**: Dependency inference from attribute references.
//! - **Graph**: Dependency graph construction and topological resolution.
//! - **Plan**: Batched execution plans for apply and destroy.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod descriptor;
pub mod expr;
pub mod graph;
pub mod parser;
pub mod plan;
pub mod resolver;
pub mod schema;
pub mod stack;

pub use descriptor::ResourceDescriptor;
pub use plan::{ExecutionPlan, PlannedStep};
pub use stack::{OutputDef, Stack};
