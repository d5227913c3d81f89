use faer::Col;

use crate::E;
use crate::linalg::interpolate;

/// Reference trajectory the cost providers track. May be a single sample
/// (a setpoint) or a full time-indexed path.
#[derive(Clone, Debug, Default)]
pub struct TargetTrajectories {
    pub times: Vec<E>,
    pub states: Vec<Col<E>>,
    pub inputs: Vec<Col<E>>,
}

impl TargetTrajectories {
    /// A constant setpoint target.
    pub fn setpoint(state: Col<E>, input: Col<E>) -> Self {
        Self {
            times: vec![0.],
            states: vec![state],
            inputs: vec![input],
        }
    }

    pub fn state_at(&self, t: E) -> Col<E> {
        interpolate(&self.times, &self.states, t)
    }

    pub fn input_at(&self, t: E) -> Col<E> {
        interpolate(&self.times, &self.inputs, t)
    }
}

/// Sequence of system modes separated by event times; `modes` always has
/// one more entry than `event_times`.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeSchedule {
    pub event_times: Vec<E>,
    pub modes: Vec<usize>,
}

impl Default for ModeSchedule {
    fn default() -> Self {
        Self { event_times: Vec::new(), modes: vec![0] }
    }
}

impl ModeSchedule {
    pub fn new(event_times: Vec<E>, modes: Vec<usize>) -> Self {
        assert_eq!(modes.len(), event_times.len() + 1, "one mode per segment");
        Self { event_times, modes }
    }
}

/// Source of the mode schedule and target trajectories. The solver pulls
/// one snapshot of each per `run` call.
pub trait ReferenceProvider: Send {
    fn mode_schedule(&self) -> ModeSchedule;

    fn target_trajectories(&self) -> TargetTrajectories;
}

/// Fixed reference: the common case of a constant mode schedule and target.
#[derive(Clone, Debug, Default)]
pub struct StaticReference {
    pub mode_schedule: ModeSchedule,
    pub target: TargetTrajectories,
}

impl ReferenceProvider for StaticReference {
    fn mode_schedule(&self) -> ModeSchedule {
        self.mode_schedule.clone()
    }

    fn target_trajectories(&self) -> TargetTrajectories {
        self.target.clone()
    }
}
