use dyn_clone::DynClone;
use faer::{Col, ColRef};
use problemo::Problem;

use crate::E;

/// A short seed trajectory used to initialize inputs outside the previous
/// horizon.
#[derive(Clone, Debug)]
pub struct TrajectorySegment {
    pub times: Vec<E>,
    pub states: Vec<Col<E>>,
    pub inputs: Vec<Col<E>>,
}

/// Source of operating trajectories: given the current state and a time
/// window, produce a plausible `(times, states, inputs)` segment.
pub trait Initializer: DynClone + Send {
    fn segment(&mut self, x: ColRef<E>, t_lo: E, t_hi: E) -> Result<TrajectorySegment, Problem>;
}

dyn_clone::clone_trait_object!(Initializer);

/// Constant operating point: holds a fixed state/input pair over any
/// requested window. The stock cold-start seed.
#[derive(Clone, Debug)]
pub struct StaticOperatingPoint {
    pub state: Col<E>,
    pub input: Col<E>,
}

impl StaticOperatingPoint {
    pub fn new(state: Col<E>, input: Col<E>) -> Self {
        Self { state, input }
    }
}

impl Initializer for StaticOperatingPoint {
    fn segment(&mut self, _x: ColRef<E>, t_lo: E, t_hi: E) -> Result<TrajectorySegment, Problem> {
        Ok(TrajectorySegment {
            times: vec![t_lo, t_hi],
            states: vec![self.state.clone(), self.state.clone()],
            inputs: vec![self.input.clone(), self.input.clone()],
        })
    }
}
