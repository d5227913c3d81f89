//! Structured QP back-end interface.
//!
//! One SQP iteration assembles a stage-structured quadratic subproblem
//!
//! ```text
//!   min  sum_i 1/2 [dx_i; du_i]' H_i [dx_i; du_i] + h_i' [dx_i; du_i]
//!        + 1/2 dx_N' H_N dx_N + h_N' dx_N
//!   s.t. dx_0 given,
//!        dx_{i+1} = A_i dx_i + B_i du_i + f_i,
//!        C_i dx_i + D_i du_i + e_i = 0        (optional, per stage)
//! ```
//!
//! and hands it to a [`StructuredQpSolver`]. Back-ends that expose the
//! stage feedback matrices of their backward pass enable the linear
//! feedback policy; others degrade the solver to feedforward output.

pub mod riccati;

use faer::{Col, ColRef, Mat};
use problemo::Problem;

use crate::E;
use crate::approximation::{LinearApproximation, QuadraticApproximation};

/// Decision and constraint dimensions of one stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageSizes {
    pub nx: usize,
    pub nu: usize,
    pub ng: usize,
}

/// Reads the per-stage sizes off an assembled subproblem. The terminal
/// entry has `nu = 0`; event stages keep the zero input dimension their
/// jump transcription produced.
pub fn extract_stage_sizes(
    dynamics: &[LinearApproximation],
    cost: &[QuadraticApproximation],
    constraints: Option<&[LinearApproximation]>,
) -> Vec<StageSizes> {
    let n = dynamics.len();
    debug_assert_eq!(cost.len(), n + 1);
    (0..=n)
        .map(|i| StageSizes {
            nx: cost[i].nx(),
            nu: cost[i].nu(),
            ng: constraints.map_or(0, |blocks| blocks[i].nrows()),
        })
        .collect()
}

/// Primal step returned by a back-end: `delta_x` has one entry per node,
/// `delta_u` one per stage (zero-sized at event stages).
#[derive(Clone, Debug)]
pub struct QpSolution {
    pub delta_x: Vec<Col<E>>,
    pub delta_u: Vec<Col<E>>,
}

/// Solver for the stage-structured equality-constrained QP.
pub trait StructuredQpSolver: Send {
    /// Prepares internal storage for the given stage sizes. Must be called
    /// whenever the horizon layout changes.
    fn resize(&mut self, sizes: &[StageSizes]) -> Result<(), Problem>;

    /// Solves the subproblem. `constraints` carries per-stage equality
    /// blocks, or `None` when no constraints reach the QP (none exist, or
    /// projection already eliminated them).
    fn solve(
        &mut self,
        dx0: ColRef<E>,
        dynamics: &[LinearApproximation],
        cost: &[QuadraticApproximation],
        constraints: Option<&[LinearApproximation]>,
    ) -> Result<QpSolution, Problem>;

    /// Stage feedback matrices of the last successful solve, in the full
    /// input space of each stage. `None` when the back-end cannot provide
    /// them.
    fn feedback_gains(&self) -> Option<&[Mat<E>]>;
}
