use dyn_clone::DynClone;
use faer::{Col, ColRef};
use problemo::Problem;

use crate::E;
use crate::approximation::LinearApproximation;

/// Stage-wise state-input constraints:
///
/// ```text
///   g(t, x, u)  = 0   (equalities)
///   h(t, x, u) <= 0   (inequalities)
/// ```
///
/// Either family may be empty; the defaults return zero-row blocks so
/// providers implement only what they have.
pub trait Constraint: DynClone + Send {
    fn equality(&mut self, _t: E, x: ColRef<E>, u: ColRef<E>) -> Result<Col<E>, Problem> {
        let _ = (x, u);
        Ok(Col::zeros(0))
    }

    fn equality_linearization(
        &mut self,
        _t: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem> {
        Ok(LinearApproximation::absent(x.nrows(), u.nrows()))
    }

    fn inequality(&mut self, _t: E, x: ColRef<E>, u: ColRef<E>) -> Result<Col<E>, Problem> {
        let _ = (x, u);
        Ok(Col::zeros(0))
    }

    fn inequality_linearization(
        &mut self,
        _t: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem> {
        Ok(LinearApproximation::absent(x.nrows(), u.nrows()))
    }
}

dyn_clone::clone_trait_object!(Constraint);

/// State-only equality constraints for pre-event and terminal nodes.
pub trait StateConstraint: DynClone + Send {
    fn equality(&mut self, _t: E, x: ColRef<E>) -> Result<Col<E>, Problem> {
        let _ = x;
        Ok(Col::zeros(0))
    }

    fn equality_linearization(
        &mut self,
        _t: E,
        x: ColRef<E>,
    ) -> Result<LinearApproximation, Problem> {
        Ok(LinearApproximation::absent(x.nrows(), 0))
    }
}

dyn_clone::clone_trait_object!(StateConstraint);
