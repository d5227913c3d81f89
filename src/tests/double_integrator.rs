use faer::{Col, ColRef, Mat};
use problemo::Problem;

use crate::approximation::{LinearApproximation, QuadraticApproximation};
use crate::ocp::{
    Cost, Dynamics, Initializer, ModeSchedule, OptimalControlProblem, StaticOperatingPoint,
    StaticReference, TargetTrajectories,
};
use crate::settings::Settings;
use crate::solver::SqpSolver;
use crate::tests::problems::{double_integrator_problem, scenario_settings};
use crate::{E, Status};

fn initializer(nx: usize, nu: usize) -> Box<dyn Initializer> {
    Box::new(StaticOperatingPoint::new(Col::zeros(nx), Col::zeros(nu)))
}

fn x0() -> Col<E> {
    Col::from_fn(2, |i| if i == 0 { 1. } else { 0. })
}

#[test]
fn test_regulates_to_origin_with_feedforward_controller() {
    let problem = double_integrator_problem();
    let mut solver = SqpSolver::new(scenario_settings(), &problem, initializer(2, 1));

    let status = solver.run(0., x0().as_ref(), 1.).unwrap();
    assert_eq!(status, Status::Converged);

    let solution = solver.primal_solution();
    assert_eq!(solution.time.len(), 11);
    assert_eq!(solution.states.len(), solution.time.len());
    assert_eq!(solution.inputs.len(), solution.time.len());
    assert!(solution.states.last().unwrap().norm_l2() < 0.1);
    assert!(solution.inputs[0].norm_l2() > 1e-2);
    assert!(!solution.controller.is_linear());
}

#[test]
fn test_event_nodes_share_time_and_input() {
    let problem = double_integrator_problem();
    let mut solver = SqpSolver::builder()
        .settings(scenario_settings())
        .problem(&problem)
        .initializer(initializer(2, 1))
        .reference(Box::new(StaticReference {
            mode_schedule: ModeSchedule::new(vec![0.45], vec![0, 1]),
            target: TargetTrajectories::default(),
        }))
        .build();

    let status = solver.run(0., x0().as_ref(), 1.).unwrap();
    assert_eq!(status, Status::Converged);

    let solution = solver.primal_solution();
    // The switch shows up as two nodes at exactly the event time.
    let event_idx = solution.time.iter().position(|&t| t == 0.45).unwrap();
    assert_eq!(solution.time[event_idx + 1], 0.45);
    // The input is undefined across the jump; the stored trajectory
    // repeats the left stage's input.
    assert_eq!(solution.inputs[event_idx], solution.inputs[event_idx - 1]);
    assert_eq!(solution.mode_schedule.event_times, vec![0.45]);
}

#[test]
fn test_feedback_policy_recovers_nominal_inputs() {
    let problem = double_integrator_problem();
    let mut settings = scenario_settings();
    settings.use_feedback_policy = true;
    let mut solver = SqpSolver::new(settings, &problem, initializer(2, 1));

    let status = solver.run(0., x0().as_ref(), 1.).unwrap();
    assert_eq!(status, Status::Converged);

    let solution = solver.primal_solution();
    assert!(solution.controller.is_linear());
    for i in 0..solution.time.len() - 1 {
        let reproduced =
            solution.controller.evaluate(solution.time[i], solution.states[i].as_ref());
        assert!(
            (&reproduced - &solution.inputs[i]).norm_l2() < 1e-12,
            "controller mismatch at node {}",
            i,
        );
    }
}

#[test]
fn test_warm_start_converges_within_one_iteration() {
    let problem = double_integrator_problem();
    let mut solver = SqpSolver::new(scenario_settings(), &problem, initializer(2, 1));

    assert!(solver.iterations_log().is_err());
    assert_eq!(solver.run(0., x0().as_ref(), 1.).unwrap(), Status::Converged);

    let status = solver.run(0., x0().as_ref(), 1.).unwrap();
    assert_eq!(status, Status::Converged);
    assert_eq!(solver.iterations_log().unwrap().len(), 1);
}

/// `x' = u` with a soft-absolute-value state cost. The cost is convex but
/// nearly flat far from the origin, so the full Newton step massively
/// overshoots and the filter has to backtrack.
#[derive(Clone)]
struct SingleIntegrator;

impl Dynamics for SingleIntegrator {
    fn flow(&mut self, _t: E, _x: ColRef<E>, u: ColRef<E>) -> Result<Col<E>, Problem> {
        Ok(u.to_owned())
    }

    fn flow_linearization(
        &mut self,
        t: E,
        x: ColRef<E>,
        u: ColRef<E>,
    ) -> Result<LinearApproximation, Problem> {
        Ok(LinearApproximation {
            f: self.flow(t, x, u)?,
            dfdx: Mat::zeros(1, 1),
            dfdu: Mat::identity(1, 1),
        })
    }
}

#[derive(Clone)]
struct SoftAbsCost;

impl Cost for SoftAbsCost {
    fn value(
        &mut self,
        _t: E,
        x: ColRef<E>,
        u: ColRef<E>,
        _target: &TargetTrajectories,
    ) -> Result<E, Problem> {
        Ok((1. + x[0] * x[0]).sqrt() - 1. + 0.005 * u[0] * u[0])
    }

    fn quadratic_approximation(
        &mut self,
        t: E,
        x: ColRef<E>,
        u: ColRef<E>,
        target: &TargetTrajectories,
    ) -> Result<QuadraticApproximation, Problem> {
        let root = (1. + x[0] * x[0]).sqrt();
        let mut quadratic = QuadraticApproximation::zeros(1, 1);
        quadratic.f = self.value(t, x, u, target)?;
        quadratic.dfdx = Col::from_fn(1, |_| x[0] / root);
        quadratic.dfdxx = Mat::from_fn(1, 1, |_, _| 1. / (root * root * root));
        quadratic.dfdu = Col::from_fn(1, |_| 0.01 * u[0]);
        quadratic.dfduu = Mat::from_fn(1, 1, |_, _| 0.01);
        Ok(quadratic)
    }
}

#[test]
fn test_full_step_rejection_backtracks_geometrically() {
    let problem =
        OptimalControlProblem::new(Box::new(SingleIntegrator), Box::new(SoftAbsCost));
    let settings = Settings {
        dt: 0.1,
        sqp_iteration: 6,
        ..Default::default()
    };
    let alpha_decay = settings.alpha_decay;
    let mut solver = SqpSolver::new(settings, &problem, initializer(1, 1));

    let start = Col::from_fn(1, |_| 10.);
    solver.run(0., start.as_ref(), 1.).unwrap();

    let log = solver.iterations_log().unwrap();
    let baseline_merit = 10. * 0.1 * ((101. as E).sqrt() - 1.);

    // The first iteration cannot take the full step: its accepted step
    // size is a whole number of decay factors below one.
    let first = log[0].step_size;
    assert!(first > 0. && first < 1.);
    let decays = first.ln() / alpha_decay.ln();
    assert!((decays - decays.round()).abs() < 1e-9);
    assert!(decays >= 1.);

    // Accepted merits never increase on this feasible problem, and the
    // final iterate improves on the initial trajectory.
    for pair in log.windows(2) {
        assert!(pair[1].performance.merit() <= pair[0].performance.merit() + 1e-12);
    }
    assert!(log.last().unwrap().performance.merit() < baseline_merit);
}

#[test]
fn test_single_thread_runs_are_bit_identical() {
    let problem = double_integrator_problem();
    let mut first = SqpSolver::new(scenario_settings(), &problem, initializer(2, 1));
    let mut second = SqpSolver::new(scenario_settings(), &problem, initializer(2, 1));

    first.run(0., x0().as_ref(), 1.).unwrap();
    second.run(0., x0().as_ref(), 1.).unwrap();

    let a = first.primal_solution();
    let b = second.primal_solution();
    assert_eq!(a.time, b.time);
    assert_eq!(a.states, b.states);
    assert_eq!(a.inputs, b.inputs);
}
