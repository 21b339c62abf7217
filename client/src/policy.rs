use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::Observation;
use std::str::FromStr;

pub trait Policy {
    fn act(&mut self, observation: &Observation) -> i64;
}

/// Uniformly random actions from `0..action_count`.
pub struct RandomPolicy {
    rng: StdRng,
    action_count: u32,
}

impl RandomPolicy {
    pub fn new(action_count: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            action_count: action_count.max(1),
        }
    }
}

impl Policy for RandomPolicy {
    fn act(&mut self, _observation: &Observation) -> i64 {
        i64::from(self.rng.gen_range(0..self.action_count))
    }
}

/// Pushes the cart under the pole: right (1) when the pole leans or swings
/// right, left (0) otherwise.
#[derive(Debug, Default)]
pub struct BalancePolicy;

impl Policy for BalancePolicy {
    fn act(&mut self, observation: &Observation) -> i64 {
        let [_, _, theta, theta_dot] = observation.values;
        if theta + 0.5 * theta_dot > 0.0 {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Random,
    Balance,
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(PolicyKind::Random),
            "balance" => Ok(PolicyKind::Balance),
            other => Err(format!("unknown policy: {}", other)),
        }
    }
}

impl PolicyKind {
    pub fn build(self, action_count: u32, seed: Option<u64>) -> Box<dyn Policy + Send> {
        match self {
            PolicyKind::Random => Box::new(RandomPolicy::new(action_count, seed)),
            PolicyKind::Balance => Box::new(BalancePolicy),
        }
    }
}
