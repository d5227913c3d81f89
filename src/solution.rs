//! Primal solution and controllers.

use faer::{Col, ColRef, Mat};

use crate::E;
use crate::linalg::{interpolate, interpolate_matrices};
use crate::ocp::ModeSchedule;

/// Pure feedforward controller: interpolates the input trajectory.
#[derive(Clone, Debug, Default)]
pub struct FeedforwardController {
    pub time: Vec<E>,
    pub inputs: Vec<Col<E>>,
}

impl FeedforwardController {
    pub fn evaluate(&self, t: E) -> Col<E> {
        interpolate(&self.time, &self.inputs, t)
    }
}

/// Time-varying affine feedback `u(t, x) = uff(t) + K(t) x`.
#[derive(Clone, Debug, Default)]
pub struct LinearFeedbackController {
    pub time: Vec<E>,
    pub feedforward: Vec<Col<E>>,
    pub gains: Vec<Mat<E>>,
}

impl LinearFeedbackController {
    pub fn evaluate(&self, t: E, x: ColRef<E>) -> Col<E> {
        let uff = interpolate(&self.time, &self.feedforward, t);
        let gain = interpolate_matrices(&self.time, &self.gains, t);
        uff + &gain * &x.to_owned()
    }
}

/// The policy attached to a primal solution.
#[derive(Clone, Debug)]
pub enum Controller {
    Feedforward(FeedforwardController),
    LinearFeedback(LinearFeedbackController),
}

impl Default for Controller {
    fn default() -> Self {
        Controller::Feedforward(FeedforwardController::default())
    }
}

impl Controller {
    /// Evaluates the policy. Must not be called on an empty controller;
    /// see [`Controller::covers`].
    pub fn evaluate(&self, t: E, x: ColRef<E>) -> Col<E> {
        match self {
            Controller::Feedforward(controller) => controller.evaluate(t),
            Controller::LinearFeedback(controller) => controller.evaluate(t, x),
        }
    }

    fn time(&self) -> &[E] {
        match self {
            Controller::Feedforward(controller) => &controller.time,
            Controller::LinearFeedback(controller) => &controller.time,
        }
    }

    /// Whether `t` lies within the time span of this controller.
    pub fn covers(&self, t: E) -> bool {
        match (self.time().first(), self.time().last()) {
            (Some(&start), Some(&end)) => t >= start && t <= end,
            _ => false,
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Controller::LinearFeedback(_))
    }
}

/// The optimized trajectory and policy of one `run` call.
///
/// `time`, `states` and `inputs` always have the same length; pre-event
/// entries store the input of the preceding stage so the trajectory is
/// well defined at duplicated node times.
#[derive(Clone, Debug, Default)]
pub struct PrimalSolution {
    pub time: Vec<E>,
    pub states: Vec<Col<E>>,
    pub inputs: Vec<Col<E>>,
    pub controller: Controller,
    pub mode_schedule: ModeSchedule,
}
