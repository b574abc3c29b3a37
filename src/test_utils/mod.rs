//! Test utilities: an in-process simulated engine implementing the driver traits.

pub mod simulated;

pub use simulated::{NativeCall, Scope, SimulatedDriver};
