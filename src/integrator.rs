//! Explicit Runge-Kutta discretizers.
//!
//! Two families: value-only discretizers advance the dynamics over one
//! shooting interval, sensitivity discretizers additionally propagate the
//! discrete Jacobians `d x_next / d x` and `d x_next / d u` through the
//! stage evaluations by the chain rule. Both are selected from the same
//! [`IntegratorType`] via the factory functions at the bottom.

use enum_dispatch::enum_dispatch;
use faer::{Col, ColRef, Mat};
use problemo::Problem;
use serde::{Deserialize, Serialize};

use crate::E;
use crate::approximation::LinearApproximation;
use crate::ocp::Dynamics;

/// Explicit integrator selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegratorType {
    Euler,
    Midpoint,
    #[default]
    Rk4,
}

/// Value-only integration of the flow over one interval.
#[enum_dispatch]
pub trait Discretizer {
    fn step(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<Col<E>, Problem>;
}

/// Integration of the flow together with its discrete sensitivities.
#[enum_dispatch]
pub trait SensitivityDiscretizer {
    fn step_with_sensitivity(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Euler;

#[derive(Clone, Copy, Debug, Default)]
pub struct Midpoint;

#[derive(Clone, Copy, Debug, Default)]
pub struct Rk4;

/// One evaluated RK stage: value and sensitivities of the stage derivative
/// with respect to the interval's initial state and input.
struct StageDerivative {
    k: Col<E>,
    dkdx: Mat<E>,
    dkdu: Mat<E>,
}

/// Evaluates the flow linearization at `x + dt_stage * k_prev` and chains
/// the previous stage sensitivities through it.
fn chained_stage(
    dynamics: &mut dyn Dynamics,
    t: E,
    x: ColRef<E>,
    u: ColRef<E>,
    dt_stage: E,
    prev: Option<&StageDerivative>,
) -> Result<StageDerivative, Problem> {
    let nx = x.nrows();
    let x = x.to_owned();
    let (x_stage, prev_dx, prev_du) = match prev {
        Some(prev) => (
            &x + dt_stage * &prev.k,
            Some(&prev.dkdx),
            Some(&prev.dkdu),
        ),
        None => (x.clone(), None, None),
    };

    let lin = dynamics.flow_linearization(t, x_stage.as_ref(), u)?;

    // d k / d x = A (I + dt_stage * d k_prev / d x), and likewise for u
    // with the direct B term added.
    let dkdx = match prev_dx {
        Some(prev_dx) => &lin.dfdx * &(Mat::<E>::identity(nx, nx) + dt_stage * prev_dx),
        None => lin.dfdx.clone(),
    };
    let dkdu = match prev_du {
        Some(prev_du) => &lin.dfdu + dt_stage * &(&lin.dfdx * prev_du),
        None => lin.dfdu.clone(),
    };

    Ok(StageDerivative { k: lin.f, dkdx, dkdu })
}

impl Discretizer for Euler {
    fn step(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<Col<E>, Problem> {
        let k = dynamics.flow(t, x, u)?;
        Ok(&x.to_owned() + dt * &k)
    }
}

impl SensitivityDiscretizer for Euler {
    fn step_with_sensitivity(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem> {
        let nx = x.nrows();
        let lin = dynamics.flow_linearization(t, x, u)?;
        Ok(LinearApproximation {
            f: &x.to_owned() + dt * &lin.f,
            dfdx: Mat::<E>::identity(nx, nx) + dt * &lin.dfdx,
            dfdu: dt * &lin.dfdu,
        })
    }
}

impl Discretizer for Midpoint {
    fn step(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<Col<E>, Problem> {
        let k1 = dynamics.flow(t, x, u)?;
        let x_mid = &x.to_owned() + (0.5 * dt) * &k1;
        let k2 = dynamics.flow(t + 0.5 * dt, x_mid.as_ref(), u)?;
        Ok(&x.to_owned() + dt * &k2)
    }
}

impl SensitivityDiscretizer for Midpoint {
    fn step_with_sensitivity(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem> {
        let nx = x.nrows();
        let s1 = chained_stage(dynamics, t, x, u, 0., None)?;
        let s2 = chained_stage(dynamics, t + 0.5 * dt, x, u, 0.5 * dt, Some(&s1))?;
        Ok(LinearApproximation {
            f: &x.to_owned() + dt * &s2.k,
            dfdx: Mat::<E>::identity(nx, nx) + dt * &s2.dkdx,
            dfdu: dt * &s2.dkdu,
        })
    }
}

impl Discretizer for Rk4 {
    fn step(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<Col<E>, Problem> {
        let k1 = dynamics.flow(t, x, u)?;
        let x2 = &x.to_owned() + (0.5 * dt) * &k1;
        let k2 = dynamics.flow(t + 0.5 * dt, x2.as_ref(), u)?;
        let x3 = &x.to_owned() + (0.5 * dt) * &k2;
        let k3 = dynamics.flow(t + 0.5 * dt, x3.as_ref(), u)?;
        let x4 = &x.to_owned() + dt * &k3;
        let k4 = dynamics.flow(t + dt, x4.as_ref(), u)?;
        let k_sum = &(&k1 + 2. * &k2) + &(2. * &k3 + &k4);
        Ok(&x.to_owned() + (dt / 6.) * &k_sum)
    }
}

impl SensitivityDiscretizer for Rk4 {
    fn step_with_sensitivity(
        &self,
        dynamics: &mut dyn Dynamics,
        t: E,
        dt: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem> {
        let nx = x.nrows();
        let s1 = chained_stage(dynamics, t, x, u, 0., None)?;
        let s2 = chained_stage(dynamics, t + 0.5 * dt, x, u, 0.5 * dt, Some(&s1))?;
        let s3 = chained_stage(dynamics, t + 0.5 * dt, x, u, 0.5 * dt, Some(&s2))?;
        let s4 = chained_stage(dynamics, t + dt, x, u, dt, Some(&s3))?;

        let k_sum = &(&s1.k + 2. * &s2.k) + &(2. * &s3.k + &s4.k);
        let dkdx_sum = &(&s1.dkdx + 2. * &s2.dkdx) + &(2. * &s3.dkdx + &s4.dkdx);
        let dkdu_sum = &(&s1.dkdu + 2. * &s2.dkdu) + &(2. * &s3.dkdu + &s4.dkdu);

        Ok(LinearApproximation {
            f: &x.to_owned() + (dt / 6.) * &k_sum,
            dfdx: Mat::<E>::identity(nx, nx) + (dt / 6.) * &dkdx_sum,
            dfdu: (dt / 6.) * &dkdu_sum,
        })
    }
}

/// Value-only discretizer variants.
#[enum_dispatch(Discretizer)]
#[derive(Clone, Copy, Debug)]
pub enum ValueDiscretizer {
    Euler,
    Midpoint,
    Rk4,
}

/// Sensitivity-propagating discretizer variants.
#[enum_dispatch(SensitivityDiscretizer)]
#[derive(Clone, Copy, Debug)]
pub enum SensitivityPropagator {
    Euler,
    Midpoint,
    Rk4,
}

/// Selects the value-only discretizer for an integrator type.
pub fn discretizer(integrator: IntegratorType) -> ValueDiscretizer {
    match integrator {
        IntegratorType::Euler => ValueDiscretizer::Euler(Euler),
        IntegratorType::Midpoint => ValueDiscretizer::Midpoint(Midpoint),
        IntegratorType::Rk4 => ValueDiscretizer::Rk4(Rk4),
    }
}

/// Selects the sensitivity-propagating discretizer for an integrator type.
pub fn sensitivity_discretizer(integrator: IntegratorType) -> SensitivityPropagator {
    match integrator {
        IntegratorType::Euler => SensitivityPropagator::Euler(Euler),
        IntegratorType::Midpoint => SensitivityPropagator::Midpoint(Midpoint),
        IntegratorType::Rk4 => SensitivityPropagator::Rk4(Rk4),
    }
}
