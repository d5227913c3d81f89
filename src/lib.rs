//! Nonlinear model predictive control via multiple-shooting SQP.
//!
//! The solver discretizes a continuous-time optimal control problem on a
//! receding horizon, linearizes dynamics, cost and constraints in parallel
//! at every shooting node, solves the resulting stage-structured QP with a
//! Riccati-factorizing back-end, and selects the step size with a filter
//! line search. The result is a locally optimal state/input trajectory,
//! optionally with a time-varying linear feedback policy built from the
//! Riccati gains.
//!
//! ```no_run
//! use faer::Col;
//! use trajopt::ocp::{OptimalControlProblem, StaticOperatingPoint};
//! use trajopt::{Settings, SqpSolver};
//!
//! # fn dynamics() -> Box<dyn trajopt::ocp::Dynamics> { unimplemented!() }
//! # fn cost() -> Box<dyn trajopt::ocp::Cost> { unimplemented!() }
//! let problem = OptimalControlProblem::new(dynamics(), cost());
//! let initializer = StaticOperatingPoint::new(Col::zeros(2), Col::zeros(1));
//! let mut solver = SqpSolver::new(Settings::default(), &problem, Box::new(initializer));
//!
//! let x0 = Col::from_fn(2, |i| if i == 0 { 1. } else { 0. });
//! let status = solver.run(0., x0.as_ref(), 1.).unwrap();
//! println!("{:?}: {} nodes", status, solver.primal_solution().time.len());
//! ```

/// Scalar type used throughout the solver.
pub type E = f64;

pub mod approximation;
pub mod grid;
pub mod integrator;
pub mod linalg;
pub mod ocp;
pub mod penalty;
pub mod performance;
pub mod pool;
pub mod qp;
pub mod search;
pub mod settings;
pub mod solution;
pub mod solver;
pub mod transcription;

#[cfg(test)]
pub mod tests;

pub use performance::PerformanceIndex;
pub use settings::Settings;
pub use solution::{Controller, PrimalSolution};
pub use solver::{SqpSolver, SqpSolverBuilder};

/// Termination status of a `run` call.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    /// The solver has not finished an outer iteration yet.
    InProgress,
    /// The filter line search declared convergence.
    Converged,
    /// The outer iteration cap was reached without convergence.
    IterationLimit,
}
