use faer::Col;
use rstest::rstest;
use rstest_reuse::{apply, template};

use crate::E;
use crate::grid::time_discretization;
use crate::ocp::{
    Initializer, OptimalControlProblem, StaticOperatingPoint, TargetTrajectories,
};
use crate::solver::SqpSolver;
use crate::tests::problems::{
    InputSumConstraint, QuadraticStageCost, QuadraticTerminalCost, TwoInputIntegrator,
    double_integrator_problem, scenario_settings,
};

fn initializer(nx: usize, nu: usize) -> Box<dyn Initializer> {
    Box::new(StaticOperatingPoint::new(Col::zeros(nx), Col::zeros(nu)))
}

fn constrained_problem() -> OptimalControlProblem {
    let mut problem = OptimalControlProblem::new(
        Box::new(TwoInputIntegrator),
        Box::new(QuadraticStageCost { q: vec![1., 1.], r: vec![1., 1.] }),
    );
    problem.terminal_cost = Some(Box::new(QuadraticTerminalCost { q: vec![100., 100.] }));
    problem.constraint = Some(Box::new(InputSumConstraint));
    problem
}

fn build(n_threads: usize) -> SqpSolver {
    let mut settings = scenario_settings();
    settings.n_threads = n_threads;
    SqpSolver::new(settings, &constrained_problem(), initializer(2, 2))
}

/// A non-trivial trajectory exercising interior, event and terminal
/// nodes with a state-input equality at every interior stage.
fn fixture() -> (Vec<crate::grid::AnnotatedTime>, Vec<Col<E>>, Vec<Col<E>>) {
    let grid = time_discretization(0., 1., 0.1, &[0.45]);
    let states: Vec<Col<E>> = (0..grid.len())
        .map(|i| Col::from_fn(2, |j| (0.3 * i as E + j as E).sin()))
        .collect();
    let inputs: Vec<Col<E>> = (0..grid.len())
        .map(|i| Col::from_fn(2, |j| 0.1 * i as E - 0.4 * j as E))
        .collect();
    (grid, states, inputs)
}

#[template]
#[rstest]
fn worker_counts(#[values(2, 4)] n_threads: usize) {}

#[apply(worker_counts)]
fn test_assembly_is_independent_of_the_worker_count(n_threads: usize) {
    let single = build(1);
    let pooled = build(n_threads);
    let (grid, states, inputs) = fixture();
    let target = TargetTrajectories::default();

    let reference = single.assemble(&grid, &states, &inputs, &target).unwrap();
    let parallel = pooled.assemble(&grid, &states, &inputs, &target).unwrap();

    // Array layout: one dynamics/projection block per stage, one cost and
    // constraint block per node.
    let n = grid.len() - 1;
    assert_eq!(reference.dynamics.len(), n);
    assert_eq!(reference.cost.len(), n + 1);
    assert_eq!(reference.constraints.len(), n + 1);
    assert_eq!(reference.projections.len(), n);

    // Event stages carry no decision input and no projection.
    let event = grid.iter().position(|node| node.is_pre_event()).unwrap();
    assert_eq!(reference.dynamics[event].dfdu.ncols(), 0);
    assert_eq!(reference.projections[event].f.nrows(), 0);

    // Stage data is written to disjoint slots, so it matches exactly.
    assert_eq!(reference.dynamics, parallel.dynamics);
    assert_eq!(reference.cost, parallel.cost);
    assert_eq!(reference.constraints, parallel.constraints);
    assert_eq!(reference.projections, parallel.projections);
    // The assembly performance is folded in stage order: exact too.
    assert_eq!(reference.performance, parallel.performance);
}

#[apply(worker_counts)]
fn test_performance_evaluation_matches_across_worker_counts(n_threads: usize) {
    let single = build(1);
    let pooled = build(n_threads);
    let (grid, states, inputs) = fixture();
    let target = TargetTrajectories::default();

    let reference = single.compute_performance(&grid, &states, &inputs, &target).unwrap();
    let parallel = pooled.compute_performance(&grid, &states, &inputs, &target).unwrap();

    // The per-worker reduction order differs, so totals agree only up to
    // floating-point associativity.
    let tol = |a: E, b: E| (a - b).abs() <= 1e-10 * (1. + a.abs().max(b.abs()));
    assert!(tol(reference.total_cost, parallel.total_cost));
    assert!(tol(reference.state_eq_ise, parallel.state_eq_ise));
    assert!(tol(reference.state_input_eq_ise, parallel.state_input_eq_ise));
    assert!(tol(reference.inequality_ise, parallel.inequality_ise));
    assert!(tol(reference.merit(), parallel.merit()));
}

#[test]
fn test_full_solve_agrees_across_worker_counts() {
    let problem = double_integrator_problem();
    let mut settings = scenario_settings();
    settings.n_threads = 1;
    let mut single = SqpSolver::new(settings.clone(), &problem, initializer(2, 1));
    settings.n_threads = 4;
    let mut pooled = SqpSolver::new(settings, &problem, initializer(2, 1));

    let x0 = Col::from_fn(2, |i| if i == 0 { 1. } else { 0. });
    single.run(0., x0.as_ref(), 1.).unwrap();
    pooled.run(0., x0.as_ref(), 1.).unwrap();

    let a = single.primal_solution();
    let b = pooled.primal_solution();
    assert_eq!(a.time, b.time);
    for (x1, x4) in a.states.iter().zip(b.states.iter()) {
        assert!((x1 - x4).norm_l2() < 1e-9);
    }
    for (u1, u4) in a.inputs.iter().zip(b.inputs.iter()) {
        assert!((u1 - u4).norm_l2() < 1e-9);
    }
}
