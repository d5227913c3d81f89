//! Per-node LQ transcription.
//!
//! Each grid node is turned into the stage data of the quadratic
//! subproblem: a linearized dynamics (or jump) block whose affine term
//! closes the shooting defect, an integrated quadratic cost, the equality
//! constraints destined for the QP, and the optional input projection.
//! Evaluation-only counterparts recompute the performance index along a
//! candidate trajectory without any linearization; the line search calls
//! them through the same parallel loop as the assembly.

use faer::{Col, ColRef};
use problemo::Problem;

use crate::E;
use crate::approximation::{LinearApproximation, QuadraticApproximation};
use crate::integrator::{Discretizer, SensitivityDiscretizer, SensitivityPropagator, ValueDiscretizer};
use crate::linalg::projection::{
    equality_projection, substitute_into_linear, substitute_into_quadratic,
};
use crate::ocp::{OptimalControlProblem, TargetTrajectories};
use crate::penalty::RelaxedBarrierPenalty;
use crate::performance::PerformanceIndex;

/// Stage data produced for one interior shooting interval or event.
pub struct Transcription {
    pub dynamics: LinearApproximation,
    pub cost: QuadraticApproximation,
    /// Equality rows enforced in the QP; zero rows when none remain.
    pub constraints: LinearApproximation,
    /// Input projection `du = f + dfdx dx + dfdu dv`; zero rows when not
    /// applied at this stage.
    pub projection: LinearApproximation,
    pub performance: PerformanceIndex,
}

/// Stage data of the terminal node: no dynamics, no projection.
pub struct TerminalTranscription {
    pub cost: QuadraticApproximation,
    pub constraints: LinearApproximation,
    pub performance: PerformanceIndex,
}

/// Squared norm of the positive part, the violation measure of `h <= 0`.
fn clamped_sq_norm(h: &Col<E>) -> E {
    let mut total = 0.;
    for i in 0..h.nrows() {
        let v = h[i].max(0.);
        total += v * v;
    }
    total
}

fn sq_norm(v: &Col<E>) -> E {
    let n = v.norm_l2();
    n * n
}

/// Linearizes one shooting interval `[t, t + dt]` around `(x, u)`.
pub fn setup_intermediate_node(
    ocp: &mut OptimalControlProblem,
    sensitivity: &SensitivityPropagator,
    penalty: Option<&RelaxedBarrierPenalty>,
    project_equalities: bool,
    target: &TargetTrajectories,
    t: E,
    dt: E,
    x: ColRef<E>,
    x_next: ColRef<E>,
    u: ColRef<E>,
) -> Result<Transcription, Problem> {
    let nx = x.nrows();
    let nu = u.nrows();
    let mut performance = PerformanceIndex::default();

    // Propagate dynamics; the affine term absorbs the shooting defect so
    // the QP equality closes the gap in a single step.
    let mut dynamics = sensitivity.step_with_sensitivity(&mut *ocp.dynamics, t, dt, x, u)?;
    let defect = &x_next.to_owned() - &dynamics.f;
    performance.state_eq_ise += sq_norm(&defect);
    dynamics.f = -defect;

    // Integrated stage cost.
    let mut cost = ocp.cost.quadratic_approximation(t, x, u, target)?;
    cost.scale(dt);
    performance.total_cost += cost.f;

    let mut constraints = LinearApproximation::absent(nx, nu);
    let mut projection = LinearApproximation::absent(nx, nu);
    if let Some(provider) = ocp.constraint.as_mut() {
        let equality = provider.equality_linearization(t, x, u)?;
        performance.state_input_eq_ise += dt * sq_norm(&equality.f);

        let inequality = provider.inequality_linearization(t, x, u)?;
        performance.inequality_ise += dt * clamped_sq_norm(&inequality.f);
        if let Some(penalty) = penalty
            && inequality.nrows() > 0
        {
            let mut soft = penalty.quadratic_approximation(&inequality);
            soft.scale(dt);
            performance.inequality_penalty += soft.f;
            cost.add(&soft);
        }

        if project_equalities && equality.nrows() > 0 {
            projection = equality_projection(&equality)?;
            substitute_into_linear(&mut dynamics, &projection);
            substitute_into_quadratic(&mut cost, &projection);
        } else {
            constraints = equality;
        }
    }

    Ok(Transcription { dynamics, cost, constraints, projection, performance })
}

/// Transcribes a pre-event node: a pure state jump with no decision input.
pub fn setup_event_node(
    ocp: &mut OptimalControlProblem,
    target: &TargetTrajectories,
    t: E,
    x: ColRef<E>,
    x_next: ColRef<E>,
) -> Result<Transcription, Problem> {
    let nx = x.nrows();
    let mut performance = PerformanceIndex::default();

    let mut dynamics = ocp.dynamics.jump_linearization(t, x)?;
    let defect = &x_next.to_owned() - &dynamics.f;
    performance.state_eq_ise += sq_norm(&defect);
    dynamics.f = -defect;

    let cost = match ocp.event_cost.as_mut() {
        Some(event_cost) => {
            let quadratic = event_cost.quadratic_approximation(t, x, target)?;
            performance.total_cost += quadratic.f;
            quadratic
        }
        None => QuadraticApproximation::zeros(nx, 0),
    };

    let constraints = match ocp.event_constraint.as_mut() {
        Some(provider) => {
            let equality = provider.equality_linearization(t, x)?;
            performance.state_input_eq_ise += sq_norm(&equality.f);
            equality
        }
        None => LinearApproximation::absent(nx, 0),
    };

    Ok(Transcription {
        dynamics,
        cost,
        constraints,
        projection: LinearApproximation::absent(nx, 0),
        performance,
    })
}

/// Transcribes the terminal node: cost and constraints only.
pub fn setup_terminal_node(
    ocp: &mut OptimalControlProblem,
    target: &TargetTrajectories,
    t: E,
    x: ColRef<E>,
) -> Result<TerminalTranscription, Problem> {
    let nx = x.nrows();
    let mut performance = PerformanceIndex::default();

    let cost = match ocp.terminal_cost.as_mut() {
        Some(terminal_cost) => {
            let quadratic = terminal_cost.quadratic_approximation(t, x, target)?;
            performance.total_cost += quadratic.f;
            quadratic
        }
        None => QuadraticApproximation::zeros(nx, 0),
    };

    let constraints = match ocp.terminal_constraint.as_mut() {
        Some(provider) => {
            let equality = provider.equality_linearization(t, x)?;
            performance.state_input_eq_ise += sq_norm(&equality.f);
            equality
        }
        None => LinearApproximation::absent(nx, 0),
    };

    Ok(TerminalTranscription { cost, constraints, performance })
}

/// Evaluation-only pass over one shooting interval.
pub fn intermediate_performance(
    ocp: &mut OptimalControlProblem,
    discretizer: &ValueDiscretizer,
    penalty: Option<&RelaxedBarrierPenalty>,
    target: &TargetTrajectories,
    t: E,
    dt: E,
    x: ColRef<E>,
    x_next: ColRef<E>,
    u: ColRef<E>,
) -> Result<PerformanceIndex, Problem> {
    let mut performance = PerformanceIndex::default();

    let propagated = discretizer.step(&mut *ocp.dynamics, t, dt, x, u)?;
    performance.state_eq_ise += sq_norm(&(&x_next.to_owned() - &propagated));
    performance.total_cost += dt * ocp.cost.value(t, x, u, target)?;

    if let Some(provider) = ocp.constraint.as_mut() {
        let equality = provider.equality(t, x, u)?;
        performance.state_input_eq_ise += dt * sq_norm(&equality);

        let inequality = provider.inequality(t, x, u)?;
        performance.inequality_ise += dt * clamped_sq_norm(&inequality);
        if let Some(penalty) = penalty {
            performance.inequality_penalty += dt * penalty.cost(&inequality);
        }
    }

    Ok(performance)
}

/// Evaluation-only pass over one event.
pub fn event_performance(
    ocp: &mut OptimalControlProblem,
    target: &TargetTrajectories,
    t: E,
    x: ColRef<E>,
    x_next: ColRef<E>,
) -> Result<PerformanceIndex, Problem> {
    let mut performance = PerformanceIndex::default();

    let jumped = ocp.dynamics.jump(t, x)?;
    performance.state_eq_ise += sq_norm(&(&x_next.to_owned() - &jumped));

    if let Some(event_cost) = ocp.event_cost.as_mut() {
        performance.total_cost += event_cost.value(t, x, target)?;
    }
    if let Some(provider) = ocp.event_constraint.as_mut() {
        performance.state_input_eq_ise += sq_norm(&provider.equality(t, x)?);
    }

    Ok(performance)
}

/// Evaluation-only pass over the terminal node.
pub fn terminal_performance(
    ocp: &mut OptimalControlProblem,
    target: &TargetTrajectories,
    t: E,
    x: ColRef<E>,
) -> Result<PerformanceIndex, Problem> {
    let mut performance = PerformanceIndex::default();

    if let Some(terminal_cost) = ocp.terminal_cost.as_mut() {
        performance.total_cost += terminal_cost.value(t, x, target)?;
    }
    if let Some(provider) = ocp.terminal_constraint.as_mut() {
        performance.state_input_eq_ise += sq_norm(&provider.equality(t, x)?);
    }

    Ok(performance)
}
