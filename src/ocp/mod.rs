//! Problem providers.
//!
//! The solver consumes the optimal control problem through cloneable
//! polymorphic providers: dynamics, costs, constraints and an initializer.
//! Every provider box is deep-cloned once per worker, so evaluations never
//! contend on provider state.

pub mod constraint;
pub mod cost;
pub mod dynamics;
pub mod initializer;
pub mod reference;

pub use constraint::{Constraint, StateConstraint};
pub use cost::{Cost, StateCost};
pub use dynamics::Dynamics;
pub use initializer::{Initializer, StaticOperatingPoint, TrajectorySegment};
pub use reference::{ModeSchedule, ReferenceProvider, StaticReference, TargetTrajectories};

/// The full provider bundle defining one optimal control problem.
///
/// Cloning produces an independent deep copy of every provider, which is
/// how the solver builds its per-worker sets.
#[derive(Clone)]
pub struct OptimalControlProblem {
    pub dynamics: Box<dyn Dynamics>,
    pub cost: Box<dyn Cost>,
    /// Cost on the terminal state; zero when absent.
    pub terminal_cost: Option<Box<dyn StateCost>>,
    /// Cost on the pre-event state at mode switches; zero when absent.
    pub event_cost: Option<Box<dyn StateCost>>,
    /// Stage-wise state-input constraints.
    pub constraint: Option<Box<dyn Constraint>>,
    /// State-only constraints at pre-event nodes.
    pub event_constraint: Option<Box<dyn StateConstraint>>,
    /// State-only constraints on the terminal state.
    pub terminal_constraint: Option<Box<dyn StateConstraint>>,
}

impl OptimalControlProblem {
    /// A bundle with dynamics and stage cost only.
    pub fn new(dynamics: Box<dyn Dynamics>, cost: Box<dyn Cost>) -> Self {
        Self {
            dynamics,
            cost,
            terminal_cost: None,
            event_cost: None,
            constraint: None,
            event_constraint: None,
            terminal_constraint: None,
        }
    }
}
