use std::fmt;
use std::ops::{Add, AddAssign};

use crate::E;

/// Scalar summary of one evaluation of the optimal control problem along a
/// candidate trajectory.
///
/// All terms are additive across stages and across workers, so per-worker
/// accumulators can be summed after a parallel section. `merit` and
/// `constraint_violation` are the two axes of the filter line search.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerformanceIndex {
    /// Integrated stage cost plus event and terminal costs.
    pub total_cost: E,
    /// Squared L2 norm of the shooting defects (dynamics gaps).
    pub state_eq_ise: E,
    /// Integrated squared state-input equality constraint violation.
    pub state_input_eq_ise: E,
    /// Integrated squared inequality constraint violation.
    pub inequality_ise: E,
    /// Accumulated relaxed-barrier penalty on the inequality constraints.
    pub inequality_penalty: E,
}

impl PerformanceIndex {
    /// Merit function driving step acceptance.
    pub fn merit(&self) -> E {
        self.total_cost + self.inequality_penalty
    }

    /// Total constraint violation `θ`, the second filter axis.
    pub fn constraint_violation(&self) -> E {
        (self.state_eq_ise + self.state_input_eq_ise + self.inequality_ise).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.total_cost.is_finite()
            && self.state_eq_ise.is_finite()
            && self.state_input_eq_ise.is_finite()
            && self.inequality_ise.is_finite()
            && self.inequality_penalty.is_finite()
    }
}

impl Add for PerformanceIndex {
    type Output = PerformanceIndex;

    fn add(self, rhs: PerformanceIndex) -> PerformanceIndex {
        PerformanceIndex {
            total_cost: self.total_cost + rhs.total_cost,
            state_eq_ise: self.state_eq_ise + rhs.state_eq_ise,
            state_input_eq_ise: self.state_input_eq_ise + rhs.state_input_eq_ise,
            inequality_ise: self.inequality_ise + rhs.inequality_ise,
            inequality_penalty: self.inequality_penalty + rhs.inequality_penalty,
        }
    }
}

impl AddAssign for PerformanceIndex {
    fn add_assign(&mut self, rhs: PerformanceIndex) {
        *self = *self + rhs;
    }
}

impl fmt::Display for PerformanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "| {:<10.4e} | {:<10.4e} | {:<10.4e} | {:<10.4e} | {:<10.4e} |",
            self.merit(),
            self.total_cost,
            self.state_eq_ise,
            self.state_input_eq_ise,
            self.inequality_ise,
        )
    }
}
