//! Infrastructure layer for flowgate.
//!
//! Contains implementations of the ports defined in `flowgate-core`: the
//! process-spawning command executor and the TOML config loader.

pub mod command;
pub mod config;
