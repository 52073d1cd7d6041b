//! # cadence-core
//!
//! Core types, configuration, and error handling for the Cadence audio streaming engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::StreamingConfig;
pub use error::{Error, Result};
pub use types::*;
