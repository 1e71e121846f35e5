//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Plan loading (JSON / YAML)

pub mod config;
pub mod logging;
pub mod plan;
