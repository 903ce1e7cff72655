//! Workflow engine core for flowgate.
//!
//! This crate defines the engine and the "ports" (the command executor trait)
//! that the infrastructure layer implements. It depends only on
//! `flowgate-types` -- never on `flowgate-infra` or any process/IO adapter.

pub mod workflow;
