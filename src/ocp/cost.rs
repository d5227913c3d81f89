use dyn_clone::DynClone;
use faer::ColRef;
use problemo::Problem;

use crate::E;
use crate::approximation::QuadraticApproximation;
use crate::ocp::reference::TargetTrajectories;

/// Intermediate stage cost rate `l(t, x, u)` evaluated against the current
/// reference. The solver integrates the rate over each shooting interval.
pub trait Cost: DynClone + Send {
    fn value(
        &mut self,
        t: E,
        x: ColRef<E>,
        u: ColRef<E>,
        target: &TargetTrajectories,
    ) -> Result<E, Problem>;

    fn quadratic_approximation(
        &mut self,
        t: E,
        x: ColRef<E>,
        u: ColRef<E>,
        target: &TargetTrajectories,
    ) -> Result<QuadraticApproximation, Problem>;
}

dyn_clone::clone_trait_object!(Cost);

/// State-only cost, used for the terminal node and for pre-event nodes.
/// Its quadratic expansion carries empty input blocks.
pub trait StateCost: DynClone + Send {
    fn value(&mut self, t: E, x: ColRef<E>, target: &TargetTrajectories) -> Result<E, Problem>;

    fn quadratic_approximation(
        &mut self,
        t: E,
        x: ColRef<E>,
        target: &TargetTrajectories,
    ) -> Result<QuadraticApproximation, Problem>;
}

dyn_clone::clone_trait_object!(StateCost);
