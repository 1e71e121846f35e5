//! Domain layer for the paraflow execution engine
//!
//! Models, errors and the port traits adapters implement. Nothing in here
//! performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{EngineError, EngineResult};
