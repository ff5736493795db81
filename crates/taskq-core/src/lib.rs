//! `taskq` Core Library
//!
//! Shared functionality for `taskq` components:
//! - Configuration resolution and hierarchy
//! - TOML job file loading
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod jobfile;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use jobfile::{JobFile, JobSpec};
