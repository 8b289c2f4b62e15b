//! # rigging-runtime
//!
//! Desired-state execution for rigging stacks.
//!
//! Handles:
//! - **Params**: Parameter values from flags, environment, and files.
//! - **Providers**: External adapters (cloud API, `kubectl`, `helm`, shell).
//! - **Executor**: Batched, bounded-parallel plan execution with retries.
//! - **Outputs**: Exported values computed from resource results.
//! - **State**: Per-stack JSON state between runs.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod engine;
pub mod exec;
pub mod executor;
pub mod outputs;
pub mod params;
pub mod provider;
pub mod retry;
pub mod scope;
pub mod state;

pub use engine::{ApplyOutcome, Engine};
pub use executor::{Executor, Outcome, Prior, RunReport};
pub use provider::{Provider, ProviderSet};
