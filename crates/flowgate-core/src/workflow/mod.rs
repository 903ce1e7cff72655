//! Workflow engine: definitions, layering, step execution, and orchestration.
//!
//! - `action` -- step actions and the command executor port
//! - `definition` -- runtime definitions, validation, document parsing and discovery
//! - `store` -- registered definitions and last-run results
//! - `dag` -- dependency layering and cycle detection
//! - `expression` -- sandboxed condition evaluator
//! - `env_scope` -- scoped process environment overrides
//! - `context` -- per-run execution context
//! - `retry` -- retry count resolution and linear backoff
//! - `executor` -- single-step executor (condition, dependencies, retry, timeout)
//! - `engine` -- orchestrator exposing register / run / status / list

pub mod action;
pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod env_scope;
pub mod executor;
pub mod expression;
pub mod retry;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
