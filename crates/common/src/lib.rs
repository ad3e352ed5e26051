//! Shadercast Common Utilities
//!
//! Shared infrastructure for all Shadercast crates:
//! - Error types and result aliases
//! - Frame clock: exact presentation timestamps and progress math
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
