//! Orthogonal projection of state-input equality constraints.
//!
//! A stage equality `C du + D dx + e = 0` with full row rank in `C` fixes
//! `ng` directions of the input. The projection splits the input step into
//! that fixed part and a free remainder,
//!
//! ```text
//!   du = Pf + Pdx dx + Pdu dv,     Pf = -C⁺ e,  Pdx = -C⁺ D,
//! ```
//!
//! where `C⁺ = C'(C C')⁻¹` and the columns of `Pdu` form an orthonormal
//! basis of the nullspace of `C`. Substituting the projection into the
//! stage model reduces the effective input dimension by `ng` and removes
//! the equality from the subproblem.

use derive_more::{Display, Error};
use faer::linalg::solvers::Solve;
use faer::{Col, Mat, Side};
use problemo::Problem;

use crate::E;
use crate::approximation::{LinearApproximation, QuadraticApproximation};

#[derive(Debug, Display, Error, PartialEq)]
pub enum ProjectionError {
    #[display("State-input equality constraints are rank deficient in the input")]
    RankDeficient,

    #[display("More equality constraints than inputs at a single stage")]
    Overconstrained,
}

/// Computes the projection `{f: Pf, dfdx: Pdx, dfdu: Pdu}` for the
/// equality block `{f: e, dfdx: D, dfdu: C}`.
pub fn equality_projection(equality: &LinearApproximation) -> Result<LinearApproximation, Problem> {
    let ng = equality.nrows();
    let nx = equality.dfdx.ncols();
    let nu = equality.dfdu.ncols();
    if ng > nu {
        return Err(ProjectionError::Overconstrained.into());
    }

    let c = &equality.dfdu;
    let c_t = c.transpose().to_owned();

    // C⁺ [e | D] = C' (C C')⁻¹ [e | D], via a Cholesky solve on the small
    // ng x ng Gram matrix. Failure means C has dependent rows.
    let gram = c * &c_t;
    let chol = gram.llt(Side::Lower).map_err(|_| ProjectionError::RankDeficient)?;
    let mut rhs = Mat::<E>::zeros(ng, 1 + nx);
    for i in 0..ng {
        rhs[(i, 0)] = equality.f[i];
        for j in 0..nx {
            rhs[(i, 1 + j)] = equality.dfdx[(i, j)];
        }
    }
    let pinv_block = &c_t * &chol.solve(&rhs);

    // Orthonormal nullspace basis of C: trailing nu - ng columns of the
    // full Q factor of C'.
    let q = c_t.qr().compute_Q();
    let pdu = Mat::<E>::from_fn(nu, nu - ng, |i, j| q[(i, ng + j)]);

    Ok(LinearApproximation {
        f: Col::from_fn(nu, |i| -pinv_block[(i, 0)]),
        dfdx: Mat::from_fn(nu, nx, |i, j| -pinv_block[(i, 1 + j)]),
        dfdu: pdu,
    })
}

/// Rewrites an affine block `f + dfdx dx + dfdu du` in terms of the free
/// input `dv`, given `du = Pf + Pdx dx + Pdu dv`. Applies to dynamics and
/// to constraint rows that stay in the subproblem.
pub fn substitute_into_linear(block: &mut LinearApproximation, projection: &LinearApproximation) {
    block.f = &block.f + &block.dfdu * &projection.f;
    block.dfdx = &block.dfdx + &block.dfdu * &projection.dfdx;
    block.dfdu = &block.dfdu * &projection.dfdu;
}

/// Rewrites a quadratic stage model in terms of the free input `dv`.
pub fn substitute_into_quadratic(
    cost: &mut QuadraticApproximation,
    projection: &LinearApproximation,
) {
    let c = &projection.f;
    let s = &projection.dfdx;
    let t = &projection.dfdu;

    // Input gradient at the projected origin, shared by several terms.
    let gu_c = &cost.dfdu + &cost.dfduu * c;

    let huu_s = &cost.dfduu * s;

    cost.f += cost.dfdu.transpose() * c + 0.5 * (c.transpose() * &cost.dfduu * c);
    cost.dfdx = &cost.dfdx + s.transpose() * &gu_c + cost.dfdux.transpose() * c;
    cost.dfdu = t.transpose() * &gu_c;
    cost.dfdxx = &cost.dfdxx
        + s.transpose() * &huu_s
        + s.transpose() * &cost.dfdux
        + cost.dfdux.transpose() * s;
    let hux_s = &huu_s + &cost.dfdux;
    cost.dfdux = t.transpose() * &hux_s;
    cost.dfduu = t.transpose() * &cost.dfduu * t;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residual_norm(equality: &LinearApproximation, projection: &LinearApproximation) -> E {
        // C (Pf + Pdx dx + Pdu dv) + D dx + e must vanish for all (dx, dv).
        let c = &equality.dfdu;
        let constant = c * &projection.f + &equality.f;
        let state_block = c * &projection.dfdx + &equality.dfdx;
        let free_block = c * &projection.dfdu;
        constant.norm_l2() + state_block.norm_l2() + free_block.norm_l2()
    }

    #[test]
    fn test_projection_annihilates_constraint() {
        // u1 + u2 = 0 with a state coupling.
        let equality = LinearApproximation {
            f: Col::from_fn(1, |_| 0.3),
            dfdx: Mat::from_fn(1, 2, |_, j| if j == 0 { 1. } else { -2. }),
            dfdu: Mat::from_fn(1, 2, |_, _| 1.),
        };
        let projection = equality_projection(&equality).unwrap();
        assert_eq!(projection.f.nrows(), 2);
        assert_eq!(projection.dfdu.ncols(), 1);
        assert!(residual_norm(&equality, &projection) < 1e-12);
    }

    #[test]
    fn test_nullspace_basis_is_orthonormal() {
        let equality = LinearApproximation {
            f: Col::zeros(1),
            dfdx: Mat::zeros(1, 1),
            dfdu: Mat::from_fn(1, 3, |_, j| (j + 1) as E),
        };
        let projection = equality_projection(&equality).unwrap();
        let basis = &projection.dfdu;
        let gram = basis.transpose() * basis;
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1. } else { 0. };
                assert!((gram[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_overconstrained_stage_is_rejected() {
        let equality = LinearApproximation {
            f: Col::zeros(2),
            dfdx: Mat::zeros(2, 1),
            dfdu: Mat::from_fn(2, 1, |i, _| (i + 1) as E),
        };
        assert!(equality_projection(&equality).is_err());
    }

    #[test]
    fn test_substitution_reduces_input_dimension() {
        let equality = LinearApproximation {
            f: Col::zeros(1),
            dfdx: Mat::zeros(1, 2),
            dfdu: Mat::from_fn(1, 2, |_, _| 1.),
        };
        let projection = equality_projection(&equality).unwrap();

        let mut dynamics = LinearApproximation {
            f: Col::from_fn(2, |i| i as E),
            dfdx: Mat::identity(2, 2),
            dfdu: Mat::from_fn(2, 2, |i, j| if i == j { 1. } else { 0. }),
        };
        substitute_into_linear(&mut dynamics, &projection);
        assert_eq!(dynamics.dfdu.ncols(), 1);

        let mut cost = QuadraticApproximation::zeros(2, 2);
        cost.dfduu = Mat::identity(2, 2);
        cost.dfdu = Col::from_fn(2, |_| 1.);
        substitute_into_quadratic(&mut cost, &projection);
        assert_eq!(cost.dfdu.nrows(), 1);
        assert_eq!(cost.dfduu.nrows(), 1);
        // The reduced curvature along the orthonormal free direction is the
        // original unit curvature.
        assert!((cost.dfduu[(0, 0)] - 1.).abs() < 1e-12);
        // The constraint direction (1,1)/sqrt(2) is orthogonal to the free
        // direction, so the projected gradient vanishes.
        assert!(cost.dfdu[0].abs() < 1e-12);
    }
}
