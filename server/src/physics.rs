//! Cart-pole dynamics: a pole hinged on a cart that moves along a frictionless
//! track. The controller pushes the cart left or right with a fixed force and
//! is rewarded for every step the pole stays upright.

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Observation, ProtocolError, StepResult};

use crate::oracle::SimulationOracle;
use crate::render::{FrameRenderer, TextRenderer};

pub const GRAVITY: f64 = 9.8;
pub const CART_MASS: f64 = 1.0;
pub const POLE_MASS: f64 = 0.1;
pub const TOTAL_MASS: f64 = CART_MASS + POLE_MASS;
/// Half the pole's length.
pub const POLE_HALF_LENGTH: f64 = 0.5;
pub const POLE_MASS_LENGTH: f64 = POLE_MASS * POLE_HALF_LENGTH;
pub const FORCE_MAG: f64 = 10.0;
/// Seconds between state updates.
pub const TAU: f64 = 0.02;
pub const X_THRESHOLD: f64 = 2.4;
pub const THETA_THRESHOLD_RADIANS: f64 = 12.0 * 2.0 * std::f64::consts::PI / 360.0;
pub const DEFAULT_MAX_EPISODE_STEPS: u32 = 200;
pub const ACTION_COUNT: u32 = 2;

/// Physical state: cart position, cart velocity, pole angle, pole angular velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartPoleState {
    pub x: f64,
    pub x_dot: f64,
    pub theta: f64,
    pub theta_dot: f64,
}

impl CartPoleState {
    pub fn observation(&self) -> Observation {
        Observation::new([self.x, self.x_dot, self.theta, self.theta_dot])
    }

    pub fn is_failed(&self) -> bool {
        self.x < -X_THRESHOLD
            || self.x > X_THRESHOLD
            || self.theta < -THETA_THRESHOLD_RADIANS
            || self.theta > THETA_THRESHOLD_RADIANS
    }

    /// Advances the state by one Euler step of length `TAU` under `force`.
    pub fn integrate(&self, force: f64) -> Self {
        let cos_theta = self.theta.cos();
        let sin_theta = self.theta.sin();

        let temp =
            (force + POLE_MASS_LENGTH * self.theta_dot * self.theta_dot * sin_theta) / TOTAL_MASS;
        let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
            / (POLE_HALF_LENGTH
                * (4.0 / 3.0 - POLE_MASS * cos_theta * cos_theta / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * cos_theta / TOTAL_MASS;

        Self {
            x: self.x + TAU * self.x_dot,
            x_dot: self.x_dot + TAU * x_acc,
            theta: self.theta + TAU * self.theta_dot,
            theta_dot: self.theta_dot + TAU * theta_acc,
        }
    }
}

/// One cart-pole episode generator with its own random source.
pub struct CartPole {
    rng: StdRng,
    state: CartPoleState,
    max_episode_steps: u32,
    elapsed_steps: u32,
    steps_beyond_done: Option<u32>,
}

impl CartPole {
    pub fn new(seed: Option<u64>, max_episode_steps: u32) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            rng,
            state: CartPoleState {
                x: 0.0,
                x_dot: 0.0,
                theta: 0.0,
                theta_dot: 0.0,
            },
            max_episode_steps,
            elapsed_steps: 0,
            steps_beyond_done: None,
        }
    }

    pub fn state(&self) -> CartPoleState {
        self.state
    }

    pub fn elapsed_steps(&self) -> u32 {
        self.elapsed_steps
    }
}

impl SimulationOracle for CartPole {
    fn reset(&mut self) -> Observation {
        let mut sample = || self.rng.gen_range(-0.05..=0.05);
        self.state = CartPoleState {
            x: sample(),
            x_dot: sample(),
            theta: sample(),
            theta_dot: sample(),
        };
        self.elapsed_steps = 0;
        self.steps_beyond_done = None;
        self.state.observation()
    }

    fn step(&mut self, action: i64) -> Result<StepResult, ProtocolError> {
        let force = match action {
            0 => -FORCE_MAG,
            1 => FORCE_MAG,
            code => {
                return Err(ProtocolError::InvalidAction {
                    code,
                    action_count: ACTION_COUNT,
                })
            }
        };

        self.state = self.state.integrate(force);
        self.elapsed_steps += 1;

        let failed = self.state.is_failed();
        let truncated = self.elapsed_steps >= self.max_episode_steps;

        let reward = match self.steps_beyond_done {
            None if failed => {
                self.steps_beyond_done = Some(0);
                1.0
            }
            None => 1.0,
            Some(beyond) => {
                if beyond == 0 {
                    warn!("step called after the episode finished; send reset first");
                }
                self.steps_beyond_done = Some(beyond + 1);
                0.0
            }
        };

        Ok(StepResult {
            observation: self.state.observation(),
            reward,
            done: failed || truncated,
        })
    }

    fn action_count(&self) -> u32 {
        ACTION_COUNT
    }

    fn frame_renderer(&self) -> Option<Box<dyn FrameRenderer>> {
        Some(Box::new(TextRenderer::default()))
    }
}
