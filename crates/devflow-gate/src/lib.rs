//! Quality gate for generated deliverables.
//!
//! The gate scores an implementation and its tests with a fixed set of
//! weighted checks. It is a pure function of its inputs and policy: the same
//! artifacts always produce the same result.

mod checks;
mod gate;
mod policy;
mod types;

pub use gate::{GateInput, QualityGate};
pub use policy::GatePolicy;
pub use types::{CheckResult, QualityResult};
