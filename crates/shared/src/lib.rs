//! Shared types for the executor: configuration, error taxonomy and the
//! runtime identity/annotation model used across all crates.

pub mod config;
pub mod error;
pub mod runtime;

pub use error::{ExecutorError, Result};
