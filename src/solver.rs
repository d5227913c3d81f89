//! Multiple-shooting SQP solver.
//!
//! Each outer iteration linearizes the optimal control problem on the
//! annotated time grid (in parallel, one provider clone per worker),
//! solves the stage-structured QP, maps projected input steps back to the
//! full input space, and runs the filter line search over re-evaluations
//! of the performance index. The accepted trajectory and the Riccati
//! feedback of the last subproblem form the returned primal solution.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use derive_more::{Display, Error};
use faer::{Col, ColRef};
use problemo::Problem;

use crate::approximation::{LinearApproximation, QuadraticApproximation};
use crate::grid::{AnnotatedTime, time_discretization};
use crate::integrator::{
    SensitivityPropagator, ValueDiscretizer, discretizer, sensitivity_discretizer,
};
use crate::linalg::stacked_norm;
use crate::ocp::{
    Initializer, ModeSchedule, OptimalControlProblem, ReferenceProvider, StaticReference,
    TargetTrajectories,
};
use crate::penalty::RelaxedBarrierPenalty;
use crate::performance::PerformanceIndex;
use crate::pool::{StageSlots, TaskCounter, ThreadPool};
use crate::qp::riccati::RiccatiSolver;
use crate::qp::{StructuredQpSolver, extract_stage_sizes};
use crate::search::FilterLineSearch;
use crate::settings::Settings;
use crate::solution::{Controller, FeedforwardController, LinearFeedbackController, PrimalSolution};
use crate::transcription::{
    TerminalTranscription, Transcription, event_performance, intermediate_performance,
    setup_event_node, setup_intermediate_node, setup_terminal_node, terminal_performance,
};
use crate::{E, Status};

#[derive(Debug, Display, Error, PartialEq)]
pub enum SolverError {
    #[display("A problem provider failed during the parallel section: {message}")]
    WorkerFailure { message: String },

    #[display("Transcription produced non-finite values; the QP step was aborted")]
    NumericalDegeneracy,

    #[display("A parallel section finished without producing every stage")]
    IncompleteAssembly,

    #[display("The initializer returned an empty operating segment")]
    EmptySeedSegment,

    #[display("The iteration log is only available after a solve")]
    NoIterationsAvailable,
}

/// Per-iteration record of the outer loop.
#[derive(Clone, Copy, Debug)]
pub struct IterationLog {
    pub iteration: usize,
    pub performance: PerformanceIndex,
    pub step_size: E,
    pub step_norm_x: E,
    pub step_norm_u: E,
}

/// Wall-clock accumulators over the phases of `run`, summed across calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolverTimings {
    pub transcription: Duration,
    pub qp_solve: Duration,
    pub line_search: Duration,
    pub total: Duration,
}

impl fmt::Display for SolverTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "| transcription {:>10.3?} | qp {:>10.3?} | line search {:>10.3?} | total {:>10.3?} |",
            self.transcription, self.qp_solve, self.line_search, self.total,
        )
    }
}

/// One worker's private provider set and scratch accumulator.
struct WorkerContext {
    ocp: OptimalControlProblem,
    value_discretizer: ValueDiscretizer,
    sensitivity_discretizer: SensitivityPropagator,
    performance: PerformanceIndex,
}

/// Stage payload produced by the parallel assembly.
enum NodeData {
    Stage(Transcription),
    Terminal(TerminalTranscription),
}

/// The assembled quadratic subproblem of one SQP iteration.
pub(crate) struct Assembly {
    pub(crate) dynamics: Vec<LinearApproximation>,
    pub(crate) cost: Vec<QuadraticApproximation>,
    pub(crate) constraints: Vec<LinearApproximation>,
    pub(crate) projections: Vec<LinearApproximation>,
    pub(crate) performance: PerformanceIndex,
    pub(crate) has_constraints: bool,
}

pub struct SqpSolver {
    settings: Settings,
    pool: ThreadPool,
    workers: Vec<Mutex<WorkerContext>>,
    initializer: Box<dyn Initializer>,
    qp_solver: Box<dyn StructuredQpSolver>,
    reference: Box<dyn ReferenceProvider>,
    penalty: Option<RelaxedBarrierPenalty>,
    has_constraint_provider: bool,
    primal_solution: PrimalSolution,
    iterations: Vec<IterationLog>,
    timings: SolverTimings,
    first_run: bool,
}

impl SqpSolver {
    /// Creates a solver with the bundled Riccati back-end and a fixed
    /// default reference. Providers are cloned once per worker.
    pub fn new(
        settings: Settings,
        problem: &OptimalControlProblem,
        initializer: Box<dyn Initializer>,
    ) -> Self {
        Self::builder()
            .settings(settings)
            .problem(problem)
            .initializer(initializer)
            .build()
    }

    pub fn builder() -> SqpSolverBuilder {
        SqpSolverBuilder::default()
    }

    /// The solution of the last `run`; empty before the first call.
    pub fn primal_solution(&self) -> &PrimalSolution {
        &self.primal_solution
    }

    /// Per-iteration log of the last `run`.
    pub fn iterations_log(&self) -> Result<&[IterationLog], Problem> {
        if self.iterations.is_empty() {
            return Err(SolverError::NoIterationsAvailable.into());
        }
        Ok(&self.iterations)
    }

    pub fn timings(&self) -> SolverTimings {
        self.timings
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replaces the reference provider consulted at the start of each run.
    pub fn set_reference_provider(&mut self, reference: Box<dyn ReferenceProvider>) {
        self.reference = reference;
    }

    /// Solves the horizon `[t0, tf]` from the measured state `x0`.
    pub fn run(&mut self, t0: E, x0: ColRef<E>, tf: E) -> Result<Status, Problem> {
        let run_start = Instant::now();
        self.iterations.clear();

        // One snapshot of the reference per run.
        let mode_schedule = self.reference.mode_schedule();
        let target = self.reference.target_trajectories();

        let grid = time_discretization(t0, tf, self.settings.dt, &mode_schedule.event_times);
        let n = grid.len() - 1;

        let mut states = self.initialize_states(&grid, x0);
        let mut inputs = self.initialize_inputs(&grid, &states)?;

        if self.settings.print_solver_status {
            println!(
                "| iter | merit      | cost       | dyn ISE    | eq ISE     | ineq ISE   | alpha    |"
            );
        }

        let mut status = Status::IterationLimit;
        let mut last_projections: Vec<LinearApproximation> = Vec::new();
        for iteration in 0..self.settings.sqp_iteration {
            // Linear-quadratic approximation of the problem on the grid.
            let transcription_start = Instant::now();
            let assembly = self.assemble(&grid, &states, &inputs, &target)?;
            self.timings.transcription += transcription_start.elapsed();
            if !assembly.performance.is_finite() {
                return Err(SolverError::NumericalDegeneracy.into());
            }

            // Structured QP solve.
            let qp_start = Instant::now();
            let constraint_blocks =
                assembly.has_constraints.then_some(assembly.constraints.as_slice());
            let sizes = extract_stage_sizes(&assembly.dynamics, &assembly.cost, constraint_blocks);
            self.qp_solver.resize(&sizes)?;
            let dx0 = &x0.to_owned() - &states[0];
            let qp_solution = self.qp_solver.solve(
                dx0.as_ref(),
                &assembly.dynamics,
                &assembly.cost,
                constraint_blocks,
            )?;
            self.timings.qp_solve += qp_start.elapsed();

            // Map projected input steps back to the full input space.
            let delta_x = qp_solution.delta_x;
            let mut delta_u = qp_solution.delta_u;
            for i in 0..n {
                let projection = &assembly.projections[i];
                if !projection.is_absent() {
                    delta_u[i] =
                        &projection.f + &projection.dfdx * &delta_x[i] + &projection.dfdu * &delta_u[i];
                }
            }

            // Filter line search over performance re-evaluations.
            let search_start = Instant::now();
            let step_norm_x = stacked_norm(&delta_x);
            let step_norm_u = stacked_norm(&delta_u);
            let filter = FilterLineSearch::new(&self.settings);
            let decision =
                filter.search(assembly.performance, step_norm_x, step_norm_u, |alpha| {
                    let (trial_states, trial_inputs) =
                        apply_step(&states, &inputs, &delta_x, &delta_u, alpha);
                    self.compute_performance(&grid, &trial_states, &trial_inputs, &target)
                })?;
            self.timings.line_search += search_start.elapsed();

            if decision.step_taken {
                let (next_states, next_inputs) =
                    apply_step(&states, &inputs, &delta_x, &delta_u, decision.step_size);
                states = next_states;
                inputs = next_inputs;
            }

            self.iterations.push(IterationLog {
                iteration,
                performance: decision.performance,
                step_size: decision.step_size,
                step_norm_x,
                step_norm_u,
            });
            if self.settings.print_solver_status {
                println!(
                    "| {:4} {} {:<8.2e} |",
                    iteration,
                    decision.performance,
                    decision.step_size,
                );
            }

            last_projections = assembly.projections;
            if decision.convergence.is_some() {
                status = Status::Converged;
                break;
            }
        }

        self.build_primal_solution(&grid, states, inputs, &last_projections, mode_schedule);
        self.first_run = false;
        self.timings.total += run_start.elapsed();

        if self.settings.print_solver_statistics {
            println!(
                "SQP finished with status {:?} after {} iterations",
                status,
                self.iterations.len(),
            );
            println!("{}", self.timings);
        }

        Ok(status)
    }

    fn initialize_states(&self, grid: &[AnnotatedTime], x0: ColRef<E>) -> Vec<Col<E>> {
        if self.first_run || self.primal_solution.time.is_empty() {
            return grid.iter().map(|_| x0.to_owned()).collect();
        }
        let previous = &self.primal_solution;
        let mut states = Vec::with_capacity(grid.len());
        states.push(x0.to_owned());
        for node in &grid[1..] {
            states.push(crate::linalg::interpolate(&previous.time, &previous.states, node.time));
        }
        states
    }

    fn initialize_inputs(
        &mut self,
        grid: &[AnnotatedTime],
        states: &[Col<E>],
    ) -> Result<Vec<Col<E>>, Problem> {
        let n = grid.len() - 1;
        let mut inputs: Vec<Col<E>> = Vec::with_capacity(grid.len());
        for i in 0..grid.len() {
            let input = if i == n || (i > 0 && grid[i].is_pre_event()) {
                inputs[i - 1].clone()
            } else if !self.first_run && self.primal_solution.controller.covers(grid[i].time) {
                self.primal_solution.controller.evaluate(grid[i].time, states[i].as_ref())
            } else {
                let segment =
                    self.initializer.segment(states[i].as_ref(), grid[i].time, grid[i + 1].time)?;
                match segment.inputs.into_iter().next() {
                    Some(first) => first,
                    None => return Err(SolverError::EmptySeedSegment.into()),
                }
            };
            inputs.push(input);
        }
        Ok(inputs)
    }

    /// Parallel LQ assembly over all stages. Stage results land in
    /// write-disjoint slots; the performance index is folded in stage
    /// order afterwards, so assembled data is independent of the worker
    /// partition.
    pub(crate) fn assemble(
        &self,
        grid: &[AnnotatedTime],
        states: &[Col<E>],
        inputs: &[Col<E>],
        target: &TargetTrajectories,
    ) -> Result<Assembly, Problem> {
        let n = grid.len() - 1;
        let slots = StageSlots::<NodeData>::new(n + 1);
        let counter = TaskCounter::new();
        let abort = AtomicBool::new(false);
        let failure: Mutex<Option<String>> = Mutex::new(None);
        let penalty = self.penalty;
        let project = self.settings.project_state_input_equality_constraints
            && self.has_constraint_provider;

        // Captured explicitly: the task closure is shared with the pool
        // threads and may only see `Sync` state.
        let workers = &self.workers;
        self.pool.run(&|worker_id| {
            let mut guard = workers[worker_id].lock().expect("worker context poisoned");
            let ctx = &mut *guard;
            loop {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                let i = counter.next();
                if i > n {
                    break;
                }
                let result = if i == n {
                    setup_terminal_node(&mut ctx.ocp, target, grid[n].time, states[n].as_ref())
                        .map(NodeData::Terminal)
                } else if grid[i].is_pre_event() {
                    setup_event_node(
                        &mut ctx.ocp,
                        target,
                        grid[i].time,
                        states[i].as_ref(),
                        states[i + 1].as_ref(),
                    )
                    .map(NodeData::Stage)
                } else {
                    setup_intermediate_node(
                        &mut ctx.ocp,
                        &ctx.sensitivity_discretizer,
                        penalty.as_ref(),
                        project,
                        target,
                        grid[i].time,
                        grid[i + 1].time - grid[i].time,
                        states[i].as_ref(),
                        states[i + 1].as_ref(),
                        inputs[i].as_ref(),
                    )
                    .map(NodeData::Stage)
                };
                match result {
                    // SAFETY: `i` was claimed through the shared counter,
                    // so this worker holds it exclusively.
                    Ok(node) => unsafe { slots.write(i, node) },
                    Err(problem) => {
                        let mut failure = failure.lock().expect("failure slot poisoned");
                        if failure.is_none() {
                            *failure = Some(format!("{:?}", problem));
                        }
                        abort.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        if let Some(message) = failure.into_inner().expect("failure slot poisoned") {
            return Err(SolverError::WorkerFailure { message }.into());
        }

        let mut assembly = Assembly {
            dynamics: Vec::with_capacity(n),
            cost: Vec::with_capacity(n + 1),
            constraints: Vec::with_capacity(n + 1),
            projections: Vec::with_capacity(n),
            performance: PerformanceIndex::default(),
            has_constraints: false,
        };
        for (i, slot) in slots.into_results().into_iter().enumerate() {
            match slot {
                Some(NodeData::Stage(node)) if i < n => {
                    assembly.performance += node.performance;
                    assembly.has_constraints |= node.constraints.nrows() > 0;
                    assembly.dynamics.push(node.dynamics);
                    assembly.cost.push(node.cost);
                    assembly.constraints.push(node.constraints);
                    assembly.projections.push(node.projection);
                }
                Some(NodeData::Terminal(node)) if i == n => {
                    assembly.performance += node.performance;
                    assembly.has_constraints |= node.constraints.nrows() > 0;
                    assembly.cost.push(node.cost);
                    assembly.constraints.push(node.constraints);
                }
                _ => return Err(SolverError::IncompleteAssembly.into()),
            }
        }
        Ok(assembly)
    }

    /// Evaluation-only pass over the horizon: same parallel loop as the
    /// assembly, but only the per-worker performance accumulators are
    /// touched. They are reduced in worker-id order.
    pub(crate) fn compute_performance(
        &self,
        grid: &[AnnotatedTime],
        states: &[Col<E>],
        inputs: &[Col<E>],
        target: &TargetTrajectories,
    ) -> Result<PerformanceIndex, Problem> {
        let n = grid.len() - 1;
        let counter = TaskCounter::new();
        let abort = AtomicBool::new(false);
        let failure: Mutex<Option<String>> = Mutex::new(None);
        let penalty = self.penalty;

        let workers = &self.workers;
        self.pool.run(&|worker_id| {
            let mut guard = workers[worker_id].lock().expect("worker context poisoned");
            let ctx = &mut *guard;
            ctx.performance = PerformanceIndex::default();
            loop {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                let i = counter.next();
                if i > n {
                    break;
                }
                let result = if i == n {
                    terminal_performance(&mut ctx.ocp, target, grid[n].time, states[n].as_ref())
                } else if grid[i].is_pre_event() {
                    event_performance(
                        &mut ctx.ocp,
                        target,
                        grid[i].time,
                        states[i].as_ref(),
                        states[i + 1].as_ref(),
                    )
                } else {
                    intermediate_performance(
                        &mut ctx.ocp,
                        &ctx.value_discretizer,
                        penalty.as_ref(),
                        target,
                        grid[i].time,
                        grid[i + 1].time - grid[i].time,
                        states[i].as_ref(),
                        states[i + 1].as_ref(),
                        inputs[i].as_ref(),
                    )
                };
                match result {
                    Ok(performance) => ctx.performance += performance,
                    Err(problem) => {
                        let mut failure = failure.lock().expect("failure slot poisoned");
                        if failure.is_none() {
                            *failure = Some(format!("{:?}", problem));
                        }
                        abort.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        if let Some(message) = failure.into_inner().expect("failure slot poisoned") {
            return Err(SolverError::WorkerFailure { message }.into());
        }

        Ok(self
            .workers
            .iter()
            .map(|worker| worker.lock().expect("worker context poisoned").performance)
            .fold(PerformanceIndex::default(), |acc, performance| acc + performance))
    }

    fn build_primal_solution(
        &mut self,
        grid: &[AnnotatedTime],
        states: Vec<Col<E>>,
        mut inputs: Vec<Col<E>>,
        projections: &[LinearApproximation],
        mode_schedule: ModeSchedule,
    ) {
        let n = grid.len() - 1;
        let time: Vec<E> = grid.iter().map(|node| node.time).collect();

        // Inputs are undefined across events; store the left stage's input
        // so the trajectory is well defined at duplicated times, and
        // duplicate the last entry to match the node count.
        for i in 1..n {
            if grid[i].is_pre_event() {
                inputs[i] = inputs[i - 1].clone();
            }
        }
        inputs[n] = inputs[n - 1].clone();

        let gains = self.qp_solver.feedback_gains();
        let controller = if self.settings.use_feedback_policy
            && let Some(gains) = gains
            && gains.len() == n
            && projections.len() == n
        {
            let mut feedforward: Vec<Col<E>> = Vec::with_capacity(n + 1);
            let mut full_gains: Vec<faer::Mat<E>> = Vec::with_capacity(n + 1);
            for i in 0..n {
                if grid[i].is_pre_event() {
                    feedforward.push(feedforward[i - 1].clone());
                    full_gains.push(full_gains[i - 1].clone());
                    continue;
                }
                let gain = if projections[i].is_absent() {
                    gains[i].clone()
                } else {
                    &projections[i].dfdx + &projections[i].dfdu * &gains[i]
                };
                feedforward.push(&inputs[i] - &gain * &states[i]);
                full_gains.push(gain);
            }
            feedforward.push(feedforward[n - 1].clone());
            full_gains.push(full_gains[n - 1].clone());
            Controller::LinearFeedback(LinearFeedbackController {
                time: time.clone(),
                feedforward,
                gains: full_gains,
            })
        } else {
            if self.settings.use_feedback_policy && self.settings.print_solver_status {
                println!("feedback gains unavailable; emitting a feedforward controller");
            }
            Controller::Feedforward(FeedforwardController {
                time: time.clone(),
                inputs: inputs.clone(),
            })
        };

        self.primal_solution = PrimalSolution { time, states, inputs, controller, mode_schedule };
    }
}

/// Forms the trial trajectories `(x + alpha dx, u + alpha du)`. Event
/// stages carry an empty input step and keep their input unchanged.
fn apply_step(
    states: &[Col<E>],
    inputs: &[Col<E>],
    delta_x: &[Col<E>],
    delta_u: &[Col<E>],
    alpha: E,
) -> (Vec<Col<E>>, Vec<Col<E>>) {
    let trial_states = states
        .iter()
        .zip(delta_x.iter())
        .map(|(x, dx)| x + alpha * dx)
        .collect();
    let trial_inputs = inputs
        .iter()
        .enumerate()
        .map(|(i, u)| {
            if i < delta_u.len() && delta_u[i].nrows() == u.nrows() {
                u + alpha * &delta_u[i]
            } else {
                u.clone()
            }
        })
        .collect();
    (trial_states, trial_inputs)
}

#[derive(Default)]
pub struct SqpSolverBuilder {
    settings: Settings,
    problem: Option<OptimalControlProblem>,
    initializer: Option<Box<dyn Initializer>>,
    qp_solver: Option<Box<dyn StructuredQpSolver>>,
    reference: Option<Box<dyn ReferenceProvider>>,
}

impl SqpSolverBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn problem(mut self, problem: &OptimalControlProblem) -> Self {
        self.problem = Some(problem.clone());
        self
    }

    pub fn initializer(mut self, initializer: Box<dyn Initializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn qp_solver(mut self, qp_solver: Box<dyn StructuredQpSolver>) -> Self {
        self.qp_solver = Some(qp_solver);
        self
    }

    pub fn reference(mut self, reference: Box<dyn ReferenceProvider>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Builds the solver, cloning one provider set per worker.
    ///
    /// # Panics
    ///
    /// Panics when the problem or the initializer is missing.
    pub fn build(self) -> SqpSolver {
        let problem = self.problem.expect("an optimal control problem is required");
        let initializer = self.initializer.expect("an initializer is required");
        let settings = self.settings;

        let n_workers = settings.worker_count();
        let workers = (0..n_workers)
            .map(|_| {
                Mutex::new(WorkerContext {
                    ocp: problem.clone(),
                    value_discretizer: discretizer(settings.integrator_type),
                    sensitivity_discretizer: sensitivity_discretizer(settings.integrator_type),
                    performance: PerformanceIndex::default(),
                })
            })
            .collect();

        let has_constraint_provider = problem.constraint.is_some();
        let penalty = (has_constraint_provider && settings.inequality_constraint_mu > 0.)
            .then(|| {
                RelaxedBarrierPenalty::new(
                    settings.inequality_constraint_mu,
                    settings.inequality_constraint_delta,
                )
            });

        SqpSolver {
            pool: ThreadPool::new(n_workers, settings.thread_priority),
            workers,
            initializer,
            qp_solver: self.qp_solver.unwrap_or_else(|| Box::new(RiccatiSolver::new())),
            reference: self.reference.unwrap_or_else(|| Box::new(StaticReference::default())),
            penalty,
            has_constraint_provider,
            primal_solution: PrimalSolution::default(),
            iterations: Vec::new(),
            timings: SolverTimings::default(),
            first_run: true,
            settings,
        }
    }
}
