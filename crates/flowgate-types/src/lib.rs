//! Shared domain types for flowgate.
//!
//! Wire-level workflow documents, run status and listing types, and engine
//! configuration. Zero infrastructure dependencies -- only serde.

pub mod config;
pub mod workflow;
