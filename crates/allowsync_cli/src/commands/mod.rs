//! CLI command implementations.

pub mod once;
pub mod run;
