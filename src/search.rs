//! Filter line search.
//!
//! Step acceptance follows the filter idea of Wächter and Biegler: a trial
//! point is judged on two axes, the merit `M = cost + penalty` and the
//! total constraint violation `theta`. Nearly feasible trials must improve
//! the merit; trials in the intermediate band may instead improve the
//! violation; trials above the hard violation cap are always rejected.

use problemo::Problem;

use crate::E;
use crate::performance::PerformanceIndex;
use crate::settings::Settings;

/// Why the search declared convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    /// The scaled step is below the step tolerance.
    SmallStep,
    /// The merit improvement is below the cost tolerance at low violation.
    SmallCostImprovement,
    /// No acceptable step size above the minimum was found.
    NoDescent,
}

/// Outcome of one line search.
#[derive(Clone, Copy, Debug)]
pub struct StepDecision {
    /// Accepted step size; meaningless when `step_taken` is false.
    pub step_size: E,
    /// Performance at the accepted point (the baseline on rejection).
    pub performance: PerformanceIndex,
    pub step_taken: bool,
    pub convergence: Option<Convergence>,
}

pub struct FilterLineSearch {
    alpha_decay: E,
    alpha_min: E,
    gamma_c: E,
    g_max: E,
    g_min: E,
    cost_tol: E,
    delta_tol: E,
    print: bool,
}

impl FilterLineSearch {
    pub fn new(settings: &Settings) -> Self {
        Self {
            alpha_decay: settings.alpha_decay,
            alpha_min: settings.alpha_min,
            gamma_c: settings.gamma_c,
            g_max: settings.g_max,
            g_min: settings.g_min,
            cost_tol: settings.cost_tol,
            delta_tol: settings.delta_tol,
            print: settings.print_linesearch,
        }
    }

    /// Filter acceptance rule. Non-finite trials are always rejected.
    fn acceptable(&self, baseline: &PerformanceIndex, trial: &PerformanceIndex) -> bool {
        if !trial.is_finite() {
            return false;
        }
        let theta = trial.constraint_violation();
        let theta_baseline = baseline.constraint_violation();
        if theta > self.g_max {
            false
        } else if theta <= self.g_min {
            trial.merit() < baseline.merit()
        } else {
            trial.merit() < baseline.merit() - self.gamma_c * theta_baseline
                || theta < (1. - self.gamma_c) * theta_baseline
        }
    }

    /// Backtracks from a full step until the filter accepts the trial or
    /// the step size underruns `alpha_min`. `trial` evaluates the
    /// performance index at a given step size.
    pub fn search(
        &self,
        baseline: PerformanceIndex,
        step_norm_x: E,
        step_norm_u: E,
        mut trial: impl FnMut(E) -> Result<PerformanceIndex, Problem>,
    ) -> Result<StepDecision, Problem> {
        let mut alpha: E = 1.;
        loop {
            let candidate = trial(alpha)?;
            let accepted = self.acceptable(&baseline, &candidate);
            if self.print {
                println!(
                    "| ls {} | alpha {:<8.2e} | merit {:<10.4e} | theta {:<10.4e} |",
                    if accepted { "accept" } else { "reject" },
                    alpha,
                    candidate.merit(),
                    candidate.constraint_violation(),
                );
            }

            let small_step = alpha * step_norm_x < self.delta_tol && alpha * step_norm_u < self.delta_tol;
            if accepted {
                let small_cost = (baseline.merit() - candidate.merit()).abs() < self.cost_tol
                    && candidate.constraint_violation() < self.g_min;
                let convergence = if small_step {
                    Some(Convergence::SmallStep)
                } else if small_cost {
                    Some(Convergence::SmallCostImprovement)
                } else {
                    None
                };
                return Ok(StepDecision {
                    step_size: alpha,
                    performance: candidate,
                    step_taken: true,
                    convergence,
                });
            }

            if small_step {
                return Ok(StepDecision {
                    step_size: 0.,
                    performance: baseline,
                    step_taken: false,
                    convergence: Some(Convergence::SmallStep),
                });
            }
            alpha *= self.alpha_decay;
            if alpha < self.alpha_min {
                return Ok(StepDecision {
                    step_size: 0.,
                    performance: baseline,
                    step_taken: false,
                    convergence: Some(Convergence::NoDescent),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_with_defaults() -> FilterLineSearch {
        FilterLineSearch::new(&Settings::default())
    }

    fn feasible(merit: E) -> PerformanceIndex {
        PerformanceIndex { total_cost: merit, ..Default::default() }
    }

    fn infeasible(merit: E, defect_sq: E) -> PerformanceIndex {
        PerformanceIndex {
            total_cost: merit,
            state_eq_ise: defect_sq,
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_merit_improvement_at_full_step() {
        let search = search_with_defaults();
        let decision = search
            .search(feasible(1.), 1., 1., |alpha| {
                assert_eq!(alpha, 1.);
                Ok(feasible(0.5))
            })
            .unwrap();
        assert!(decision.step_taken);
        assert_eq!(decision.step_size, 1.);
        assert!(decision.convergence.is_none());
    }

    #[test]
    fn test_decays_until_acceptance() {
        let search = search_with_defaults();
        let mut alphas = Vec::new();
        let decision = search
            .search(feasible(1.), 1., 1., |alpha| {
                alphas.push(alpha);
                // Only a quarter step improves the merit.
                Ok(feasible(if alpha <= 0.25 { 0.9 } else { 2. }))
            })
            .unwrap();
        assert!(decision.step_taken);
        assert_eq!(alphas, vec![1., 0.5, 0.25]);
        assert_eq!(decision.step_size, 0.25);
    }

    #[test]
    fn test_rejects_above_violation_cap() {
        let search = search_with_defaults();
        // Large violation is rejected regardless of the merit.
        let decision = search
            .search(infeasible(1., 1.), 1., 1., |_| Ok(infeasible(-100., 1e14)))
            .unwrap();
        assert!(!decision.step_taken);
        assert_eq!(decision.convergence, Some(Convergence::NoDescent));
    }

    #[test]
    fn test_violation_reduction_is_acceptable() {
        let search = search_with_defaults();
        // Merit worsens slightly but the violation shrinks.
        let decision = search
            .search(infeasible(1., 1.), 1., 1., |_| Ok(infeasible(1.05, 0.25)))
            .unwrap();
        assert!(decision.step_taken);
    }

    #[test]
    fn test_non_finite_trial_is_rejected() {
        let search = search_with_defaults();
        let mut calls = 0;
        let decision = search
            .search(feasible(1.), 1., 1., |alpha| {
                calls += 1;
                Ok(feasible(if alpha > 0.9 { E::NAN } else { 0.1 }))
            })
            .unwrap();
        assert!(decision.step_taken);
        assert_eq!(calls, 2);
        assert_eq!(decision.step_size, 0.5);
    }

    #[test]
    fn test_zero_step_converges_immediately() {
        let search = search_with_defaults();
        // A feasible baseline with a zero step: the trial equals the
        // baseline, no strict merit decrease exists, and the zero step
        // norm declares convergence.
        let baseline = feasible(1.);
        let decision = search.search(baseline, 0., 0., |_| Ok(baseline)).unwrap();
        assert_eq!(decision.convergence, Some(Convergence::SmallStep));
    }
}
