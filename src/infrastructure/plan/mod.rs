//! Implementation plan loading.

pub mod loader;

pub use loader::{PlanFormat, PlanLoader};
