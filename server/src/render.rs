//! Best-effort frame rendering for the designated instance.
//!
//! The instance publishes each new observation on a `watch` channel and the
//! render task renders whatever snapshot is latest. Rendering never touches
//! the simulation itself, and nothing it does is visible to the client:
//! errors are logged, panics are caught, and the task is joined on shutdown.

use log::{debug, error, info, warn};
use shared::Observation;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::physics::{THETA_THRESHOLD_RADIANS, X_THRESHOLD};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("observation out of drawable range: {0}")]
    OutOfRange(f64),
    #[error("renderer failed: {0}")]
    Failed(String),
}

pub trait FrameRenderer: Send + 'static {
    fn render(&mut self, observation: &Observation) -> Result<String, RenderError>;
}

/// Draws the cart as `#` on a track and the pole as `/`, `|` or `\`.
pub struct TextRenderer {
    width: usize,
}

impl TextRenderer {
    pub fn new(width: usize) -> Self {
        Self { width: width.max(3) }
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new(49)
    }
}

impl FrameRenderer for TextRenderer {
    fn render(&mut self, observation: &Observation) -> Result<String, RenderError> {
        let [x, _, theta, _] = observation.values;
        if !x.is_finite() {
            return Err(RenderError::OutOfRange(x));
        }
        if !theta.is_finite() {
            return Err(RenderError::OutOfRange(theta));
        }

        let span = (self.width - 1) as f64;
        let clamped = x.clamp(-X_THRESHOLD, X_THRESHOLD);
        let column = (((clamped + X_THRESHOLD) / (2.0 * X_THRESHOLD)) * span).round() as usize;

        let pole = if theta > THETA_THRESHOLD_RADIANS / 3.0 {
            '/'
        } else if theta < -THETA_THRESHOLD_RADIANS / 3.0 {
            '\\'
        } else {
            '|'
        };

        let track: String = (0..self.width)
            .map(|i| if i == column { '#' } else { '.' })
            .collect();
        Ok(format!("[{}] {} x={:+.3} theta={:+.3}", track, pole, x, theta))
    }
}

/// Handle to a running render task.
pub struct RenderChannel {
    instance: usize,
    handle: JoinHandle<u64>,
}

impl RenderChannel {
    /// Spawns the render task. It exits when the publisher is dropped or the
    /// shutdown flag is raised.
    pub fn spawn(
        instance: usize,
        mut renderer: Box<dyn FrameRenderer>,
        mut snapshots: watch::Receiver<Option<Observation>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut frames = 0u64;
            loop {
                tokio::select! {
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let snapshot = *snapshots.borrow_and_update();
                let Some(observation) = snapshot else {
                    continue;
                };

                match panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&observation))) {
                    Ok(Ok(frame)) => {
                        frames += 1;
                        debug!("instance {} frame {}: {}", instance, frames, frame);
                    }
                    Ok(Err(e)) => warn!("instance {} render failed: {}", instance, e),
                    Err(_) => warn!("instance {} renderer panicked", instance),
                }
            }
            frames
        });

        info!("Render side-channel started for instance {}", instance);
        Self { instance, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task and logs how it ended. Returns the number of frames
    /// rendered, or `None` if the task did not finish cleanly.
    pub async fn join(self) -> Option<u64> {
        match self.handle.await {
            Ok(frames) => {
                info!(
                    "Render side-channel for instance {} stopped after {} frames",
                    self.instance, frames
                );
                Some(frames)
            }
            Err(e) => {
                error!("Render side-channel for instance {} failed: {}", self.instance, e);
                None
            }
        }
    }
}
