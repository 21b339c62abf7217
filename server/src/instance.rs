use log::{debug, info};
use shared::{Observation, ProtocolError, StepResult, OBSERVATION_LEN};
use tokio::sync::watch;

use crate::oracle::SimulationOracle;
use crate::render::RenderChannel;

/// One simulation bound to one instance server.
///
/// The instance is reset once on construction, so stepping is valid before a
/// client ever sends `reset`. Every observation it produces is also published
/// to a `watch` channel that the render side-channel reads from.
pub struct SimulationInstance {
    index: usize,
    oracle: Box<dyn SimulationOracle>,
    current: Observation,
    snapshots: watch::Sender<Option<Observation>>,
    renders: bool,
    render: Option<RenderChannel>,
}

impl SimulationInstance {
    pub fn new(index: usize, mut oracle: Box<dyn SimulationOracle>, renders: bool) -> Self {
        let current = oracle.reset();
        let (snapshots, _) = watch::channel(Some(current));
        debug!("Instance {} initialised", index);

        Self {
            index,
            oracle,
            current,
            snapshots,
            renders,
            render: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Observation {
        self.current
    }

    pub fn observation_len(&self) -> usize {
        OBSERVATION_LEN
    }

    pub fn action_count(&self) -> u32 {
        self.oracle.action_count()
    }

    pub fn reset(&mut self) -> Observation {
        self.current = self.oracle.reset();
        self.publish();
        self.current
    }

    pub fn step(&mut self, action: i64) -> Result<StepResult, ProtocolError> {
        let result = self.oracle.step(action)?;
        self.current = result.observation;
        self.publish();
        Ok(result)
    }

    fn publish(&self) {
        self.snapshots.send_replace(Some(self.current));
    }

    /// Starts the render side-channel if this instance is the designated one
    /// and it is not already running. Returns whether a channel is running.
    pub fn ensure_render_started(&mut self, shutdown: &watch::Receiver<bool>) -> bool {
        if !self.renders {
            return false;
        }
        if let Some(channel) = &self.render {
            if !channel.is_finished() {
                return true;
            }
        }

        let Some(renderer) = self.oracle.frame_renderer() else {
            info!("Instance {} has no frame renderer, rendering disabled", self.index);
            self.renders = false;
            return false;
        };

        self.render = Some(RenderChannel::spawn(
            self.index,
            renderer,
            self.snapshots.subscribe(),
            shutdown.clone(),
        ));
        true
    }

    pub fn take_render(&mut self) -> Option<RenderChannel> {
        self.render.take()
    }
}
