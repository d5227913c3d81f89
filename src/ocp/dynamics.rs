use dyn_clone::DynClone;
use faer::{Col, ColRef, Mat};
use problemo::Problem;

use crate::E;
use crate::approximation::LinearApproximation;

/// Continuous-time system dynamics `x' = f(t, x, u)` with an optional jump
/// map `x⁺ = g(t, x⁻)` applied at mode switches.
///
/// Implementations may cache intermediate results behind `&mut self`; the
/// solver guarantees each clone is driven by a single worker.
pub trait Dynamics: DynClone + Send {
    /// Flow value `f(t, x, u)`.
    fn flow(&mut self, t: E, x: ColRef<E>, u: ColRef<E>) -> Result<Col<E>, Problem>;

    /// Flow value together with its Jacobians `df/dx` and `df/du`.
    fn flow_linearization(
        &mut self,
        t: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem>;

    /// Jump map across an event; identity unless overridden.
    fn jump(&mut self, _t: E, x: ColRef<E>) -> Result<Col<E>, Problem> {
        Ok(x.to_owned())
    }

    /// Jump map value and state Jacobian; the input block is empty because
    /// events carry no decision input.
    fn jump_linearization(&mut self, _t: E, x: ColRef<E>) -> Result<LinearApproximation, Problem> {
        let nx = x.nrows();
        Ok(LinearApproximation {
            f: x.to_owned(),
            dfdx: Mat::identity(nx, nx),
            dfdu: Mat::zeros(nx, 0),
        })
    }
}

dyn_clone::clone_trait_object!(Dynamics);
