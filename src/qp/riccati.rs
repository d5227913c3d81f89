//! Dense Riccati recursion back-end.
//!
//! Solves the stage-structured QP by a backward Riccati sweep followed by
//! a forward rollout, which is exact for the equality-constrained LQ
//! problem and produces the stage feedback matrices as a by-product.
//! Stage equality blocks are eliminated locally with the same orthogonal
//! projection used elsewhere; they must therefore have full row rank in
//! the input, and input-free stages (events, terminal) cannot carry
//! constraint blocks with this back-end.

use derive_more::{Display, Error};
use faer::linalg::solvers::Solve;
use faer::{Col, ColRef, Mat, Side};
use problemo::Problem;

use crate::E;
use crate::approximation::{LinearApproximation, QuadraticApproximation};
use crate::linalg::projection::{
    equality_projection, substitute_into_linear, substitute_into_quadratic,
};
use crate::qp::{QpSolution, StageSizes, StructuredQpSolver, extract_stage_sizes};

#[derive(Debug, Display, Error, PartialEq)]
pub enum RiccatiError {
    #[display("Input Hessian block is not positive definite")]
    NotPositiveDefinite,

    #[display("Constraint block at an input-free stage is not supported")]
    UnsupportedConstraint,

    #[display("Subproblem shape does not match the configured stage sizes")]
    ShapeMismatch,
}

/// Riccati-factorizing solver for the stage-structured equality-constrained
/// QP, with per-stage feedback extraction.
#[derive(Default)]
pub struct RiccatiSolver {
    sizes: Vec<StageSizes>,
    gains: Vec<Mat<E>>,
    gains_valid: bool,
}

impl RiccatiSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn symmetrized(m: &Mat<E>) -> Mat<E> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| 0.5 * (m[(i, j)] + m[(j, i)]))
}

/// One stage after local constraint elimination.
struct ReducedStage {
    dynamics: LinearApproximation,
    cost: QuadraticApproximation,
    /// Projection mapping the reduced input back to the full one; absent
    /// when the stage carried no constraint block.
    projection: LinearApproximation,
}

impl StructuredQpSolver for RiccatiSolver {
    fn resize(&mut self, sizes: &[StageSizes]) -> Result<(), Problem> {
        self.sizes = sizes.to_vec();
        self.gains.clear();
        self.gains_valid = false;
        Ok(())
    }

    fn solve(
        &mut self,
        dx0: ColRef<E>,
        dynamics: &[LinearApproximation],
        cost: &[QuadraticApproximation],
        constraints: Option<&[LinearApproximation]>,
    ) -> Result<QpSolution, Problem> {
        self.gains_valid = false;

        let n = dynamics.len();
        if extract_stage_sizes(dynamics, cost, constraints) != self.sizes
            || dx0.nrows() != self.sizes[0].nx
        {
            return Err(RiccatiError::ShapeMismatch.into());
        }
        if let Some(blocks) = constraints
            && blocks[n].nrows() > 0
        {
            return Err(RiccatiError::UnsupportedConstraint.into());
        }

        // Local constraint elimination per stage.
        let mut stages = Vec::with_capacity(n);
        for i in 0..n {
            let block = constraints.map(|blocks| &blocks[i]).filter(|block| !block.is_absent());
            let stage = match block {
                None => ReducedStage {
                    dynamics: dynamics[i].clone(),
                    cost: cost[i].clone(),
                    projection: LinearApproximation::absent(self.sizes[i].nx, self.sizes[i].nu),
                },
                Some(block) => {
                    if self.sizes[i].nu == 0 {
                        return Err(RiccatiError::UnsupportedConstraint.into());
                    }
                    let projection = equality_projection(block)?;
                    let mut reduced_dynamics = dynamics[i].clone();
                    let mut reduced_cost = cost[i].clone();
                    substitute_into_linear(&mut reduced_dynamics, &projection);
                    substitute_into_quadratic(&mut reduced_cost, &projection);
                    ReducedStage {
                        dynamics: reduced_dynamics,
                        cost: reduced_cost,
                        projection,
                    }
                }
            };
            stages.push(stage);
        }

        // Backward Riccati sweep.
        let mut p_mat = symmetrized(&cost[n].dfdxx);
        let mut p_vec = cost[n].dfdx.clone();
        let mut reduced_gains: Vec<Mat<E>> = Vec::with_capacity(n);
        let mut feedforward: Vec<Col<E>> = Vec::with_capacity(n);
        for stage in stages.iter().rev() {
            let a = &stage.dynamics.dfdx;
            let b = &stage.dynamics.dfdu;
            let f = &stage.dynamics.f;
            let nx = a.ncols();
            let nu = b.ncols();

            // Cost-to-go gradient pushed through the affine dynamics.
            let pf_p = &p_vec + &p_mat * f;
            let gx = &stage.cost.dfdx + a.transpose() * &pf_p;

            if nu == 0 {
                reduced_gains.push(Mat::zeros(0, nx));
                feedforward.push(Col::zeros(0));
                p_mat = symmetrized(&(&stage.cost.dfdxx + a.transpose() * &(&p_mat * a)));
                p_vec = gx;
                continue;
            }

            let huu = symmetrized(&(&stage.cost.dfduu + b.transpose() * &(&p_mat * b)));
            let hux = &stage.cost.dfdux + b.transpose() * &(&p_mat * a);
            let gu = &stage.cost.dfdu + b.transpose() * &pf_p;

            let chol = huu.llt(Side::Lower).map_err(|_| RiccatiError::NotPositiveDefinite)?;
            let mut rhs = Mat::<E>::zeros(nu, nx + 1);
            for r in 0..nu {
                for c in 0..nx {
                    rhs[(r, c)] = hux[(r, c)];
                }
                rhs[(r, nx)] = gu[r];
            }
            let sol = chol.solve(&rhs);
            let gain = Mat::<E>::from_fn(nu, nx, |r, c| -sol[(r, c)]);
            let ff = Col::<E>::from_fn(nu, |r| -sol[(r, nx)]);

            p_mat = symmetrized(
                &(&stage.cost.dfdxx + a.transpose() * &(&p_mat * a) + hux.transpose() * &gain),
            );
            p_vec = &gx + hux.transpose() * &ff;

            reduced_gains.push(gain);
            feedforward.push(ff);
        }
        reduced_gains.reverse();
        feedforward.reverse();

        // Forward rollout, mapping reduced steps back to the full input.
        let mut delta_x = Vec::with_capacity(n + 1);
        let mut delta_u = Vec::with_capacity(n);
        let mut gains = Vec::with_capacity(n);
        delta_x.push(dx0.to_owned());
        for (i, stage) in stages.iter().enumerate() {
            let dx = delta_x[i].clone();
            let dv = &feedforward[i] + &reduced_gains[i] * &dx;
            let dx_next = &stage.dynamics.f + &stage.dynamics.dfdx * &dx + &stage.dynamics.dfdu * &dv;

            if stage.projection.is_absent() {
                gains.push(reduced_gains[i].clone());
                delta_u.push(dv);
            } else {
                let p = &stage.projection;
                gains.push(&p.dfdx + &p.dfdu * &reduced_gains[i]);
                delta_u.push(&p.f + &p.dfdx * &dx + &p.dfdu * &dv);
            }
            delta_x.push(dx_next);
        }

        self.gains = gains;
        self.gains_valid = true;
        Ok(QpSolution { delta_x, delta_u })
    }

    fn feedback_gains(&self) -> Option<&[Mat<E>]> {
        self.gains_valid.then_some(self.gains.as_slice())
    }
}
