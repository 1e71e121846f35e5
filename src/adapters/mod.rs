//! Implementations of the domain ports.

pub mod sinks;
pub mod toolchains;
