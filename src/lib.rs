//! Test-stand interlock workspace root.
//!
//! Re-exports the panels and phase table (`sim`), the evaluators (`safety`) and the
//! mode machine (`controller`) so scenario tests can depend on a single crate.

pub use controller::*;
pub use safety::*;
pub use sim::*;
