use serde::{Deserialize, Serialize};

use crate::E;
use crate::integrator::IntegratorType;

/// Solver configuration.
///
/// Deserializes with per-field defaults, so configuration files only need
/// to list the options they override.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Total number of workers, including the calling thread. Values
    /// below 1 are treated as 1 (the caller does all the work).
    pub n_threads: usize,
    /// Best-effort OS priority hint for the pool threads.
    pub thread_priority: Option<i32>,
    /// Nominal grid spacing of the shooting horizon.
    pub dt: E,
    /// Outer SQP iteration cap.
    pub sqp_iteration: usize,
    /// Integrator used for dynamics propagation and sensitivities.
    pub integrator_type: IntegratorType,
    /// Eliminate state-input equality constraints from the subproblem by
    /// projecting them out of the input. Has no effect without a
    /// constraint provider.
    pub project_state_input_equality_constraints: bool,
    /// Relaxed-barrier weight on inequality constraints; the penalty is
    /// only built when positive and a constraint provider exists.
    pub inequality_constraint_mu: E,
    /// Relaxed-barrier switching point.
    pub inequality_constraint_delta: E,
    /// Emit a time-varying linear feedback policy instead of a pure
    /// feedforward controller.
    pub use_feedback_policy: bool,

    // Filter line search.
    pub alpha_decay: E,
    pub alpha_min: E,
    pub gamma_c: E,
    pub g_max: E,
    pub g_min: E,
    pub cost_tol: E,
    pub delta_tol: E,

    // Diagnostics (observational only).
    pub print_solver_status: bool,
    pub print_linesearch: bool,
    pub print_solver_statistics: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            n_threads: 1,
            thread_priority: None,
            dt: 0.01,
            sqp_iteration: 10,
            integrator_type: IntegratorType::Rk4,
            project_state_input_equality_constraints: true,
            inequality_constraint_mu: 0.,
            inequality_constraint_delta: 1e-3,
            use_feedback_policy: false,

            alpha_decay: 0.5,
            alpha_min: 1e-4,
            gamma_c: 1e-6,
            g_max: 1e6,
            g_min: 1e-6,
            cost_tol: 1e-4,
            delta_tol: 1e-6,

            print_solver_status: false,
            print_linesearch: false,
            print_solver_statistics: false,
        }
    }
}

impl Settings {
    /// Worker count with the `n_threads < 1` clamp applied.
    pub fn worker_count(&self) -> usize {
        self.n_threads.max(1)
    }
}
