use shared::{Observation, ProtocolError, StepResult};

use crate::render::FrameRenderer;

/// The state-transition model bound to one simulation instance.
///
/// Implementations own all simulation state; the server only ever talks to
/// them through these calls, one at a time, from the instance's own task.
pub trait SimulationOracle: Send + 'static {
    /// Starts a new episode and returns its initial observation.
    fn reset(&mut self) -> Observation;

    /// Applies `action` and advances one step. Codes outside
    /// `0..action_count()` are rejected without touching the state.
    fn step(&mut self, action: i64) -> Result<StepResult, ProtocolError>;

    fn action_count(&self) -> u32;

    /// Renderer for the optional frame side-channel.
    fn frame_renderer(&self) -> Option<Box<dyn FrameRenderer>> {
        None
    }
}

/// Builds the oracle for a given instance index.
pub type OracleFactory = dyn Fn(usize) -> Box<dyn SimulationOracle> + Send + Sync;
