use faer::{Col, Mat};

use crate::E;
use crate::approximation::{LinearApproximation, QuadraticApproximation};

/// Relaxed log-barrier penalty for inequality constraints `h(x, u) <= 0`.
///
/// Inside the relaxed region (`-h > delta`) the penalty is the exact log
/// barrier `-mu ln(-h)`; outside it switches to a quadratic extension that
/// matches value, slope and curvature at the switch point, so the penalty
/// is twice continuously differentiable everywhere:
///
/// ```text
///   p(h) = -mu ln(-h)                                   if -h > delta
///   p(h) = mu/2 ((-h - 2 delta)/delta)^2 - mu/2 - mu ln(delta)   otherwise
/// ```
#[derive(Clone, Copy, Debug)]
pub struct RelaxedBarrierPenalty {
    mu: E,
    delta: E,
}

impl RelaxedBarrierPenalty {
    pub fn new(mu: E, delta: E) -> Self {
        assert!(mu > 0., "penalty weight must be positive");
        assert!(delta > 0., "relaxation parameter must be positive");
        Self { mu, delta }
    }

    fn value(&self, h: E) -> E {
        let z = -h;
        if z > self.delta {
            -self.mu * z.ln()
        } else {
            let r = (z - 2. * self.delta) / self.delta;
            0.5 * self.mu * (r * r - 1.) - self.mu * self.delta.ln()
        }
    }

    fn derivative(&self, h: E) -> E {
        let z = -h;
        if z > self.delta {
            -self.mu / h
        } else {
            self.mu * (2. * self.delta - z) / (self.delta * self.delta)
        }
    }

    fn second_derivative(&self, h: E) -> E {
        let z = -h;
        if z > self.delta {
            self.mu / (h * h)
        } else {
            self.mu / (self.delta * self.delta)
        }
    }

    /// Summed penalty over a stacked constraint value.
    pub fn cost(&self, h: &Col<E>) -> E {
        let mut total = 0.;
        for i in 0..h.nrows() {
            total += self.value(h[i]);
        }
        total
    }

    /// Gauss-Newton expansion of the summed penalty through the constraint
    /// linearization: gradient `J' p'(h)` and Hessian `J' diag(p''(h)) J`.
    pub fn quadratic_approximation(&self, h: &LinearApproximation) -> QuadraticApproximation {
        let ng = h.nrows();
        let nx = h.dfdx.ncols();
        let nu = h.dfdu.ncols();

        let dp = Col::<E>::from_fn(ng, |i| self.derivative(h.f[i]));
        let ddp = Col::<E>::from_fn(ng, |i| self.second_derivative(h.f[i]));

        // diag(p'') J, reused for all three Hessian blocks.
        let wdx = Mat::<E>::from_fn(ng, nx, |i, j| ddp[i] * h.dfdx[(i, j)]);
        let wdu = Mat::<E>::from_fn(ng, nu, |i, j| ddp[i] * h.dfdu[(i, j)]);

        QuadraticApproximation {
            f: self.cost(&h.f),
            dfdx: h.dfdx.transpose() * &dp,
            dfdu: h.dfdu.transpose() * &dp,
            dfdxx: h.dfdx.transpose() * &wdx,
            dfduu: h.dfdu.transpose() * &wdu,
            dfdux: h.dfdu.transpose() * &wdx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_branch() {
        let penalty = RelaxedBarrierPenalty::new(2., 1e-2);
        // Deep inside the feasible region the penalty is the log barrier.
        assert!((penalty.value(-1.) - 0.).abs() < 1e-12);
        assert!((penalty.value(-0.5) - (-2. * (0.5 as E).ln())).abs() < 1e-12);
    }

    #[test]
    fn test_branch_continuity() {
        let penalty = RelaxedBarrierPenalty::new(0.7, 1e-3);
        let h = -penalty.delta;
        let eps = 1e-9;
        for (left, right) in [
            (penalty.value(h - eps), penalty.value(h + eps)),
            (penalty.derivative(h - eps), penalty.derivative(h + eps)),
            (penalty.second_derivative(h - eps), penalty.second_derivative(h + eps)),
        ] {
            assert!((left - right).abs() < 1e-4 * (1. + left.abs()));
        }
    }

    #[test]
    fn test_penalty_grows_with_violation() {
        let penalty = RelaxedBarrierPenalty::new(1., 1e-2);
        assert!(penalty.value(0.5) > penalty.value(0.1));
        assert!(penalty.value(0.1) > penalty.value(-1.));
    }

    #[test]
    fn test_quadratic_approximation_matches_scalars() {
        let penalty = RelaxedBarrierPenalty::new(1.5, 1e-2);
        let h = LinearApproximation {
            f: Col::from_fn(1, |_| -0.25),
            dfdx: Mat::from_fn(1, 2, |_, j| if j == 0 { 1. } else { 0. }),
            dfdu: Mat::from_fn(1, 1, |_, _| 3.),
        };
        let quad = penalty.quadratic_approximation(&h);
        assert!((quad.f - penalty.value(-0.25)).abs() < 1e-12);
        assert!((quad.dfdx[0] - penalty.derivative(-0.25)).abs() < 1e-12);
        assert!((quad.dfdu[0] - 3. * penalty.derivative(-0.25)).abs() < 1e-12);
        assert!((quad.dfduu[(0, 0)] - 9. * penalty.second_derivative(-0.25)).abs() < 1e-12);
        assert!((quad.dfdux[(0, 0)] - 3. * penalty.second_derivative(-0.25)).abs() < 1e-12);
        assert_eq!(quad.dfdxx[(1, 1)], 0.);
    }
}
