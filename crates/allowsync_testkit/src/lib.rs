//! # AllowSync Testkit
//!
//! Test utilities for AllowSync.
//!
//! This crate provides:
//! - Property-based generators for identity records
//! - Fixtures: temporary identity files, scripted HTTP clients and
//!   failing backends
//! - A concurrent reader harness for torn-read checks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use allowsync_testkit::prelude::*;
//!
//! let file = IdentityFile::with_records(&sample_identities(3));
//! let loader = LocalFileLoader::new(LocalSourceConfig::new(file.path()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
