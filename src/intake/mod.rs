//! Intake dialog: validation rules and the per-user state machine.
//!
//! Nothing here performs I/O. The funnel orchestrator feeds inputs in,
//! performs the resulting effects and decides when the new state sticks.

pub mod state;
pub mod validation;

pub use state::{Effect, IntakeInput, IntakeState, Transition, transition};
pub use validation::ValidationError;
