use log::{debug, info};

use crate::network::{ClientError, SimClient};
use crate::policy::Policy;

/// Outcome of one episode played against a server instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeSummary {
    pub steps: u32,
    pub total_reward: f64,
}

/// Resets the instance and plays `policy` until the server reports done or
/// `max_steps` is reached.
pub async fn run_episode(
    client: &mut SimClient,
    policy: &mut (dyn Policy + Send),
    max_steps: u32,
) -> Result<EpisodeSummary, ClientError> {
    let mut observation = client.reset().await?;
    let mut summary = EpisodeSummary {
        steps: 0,
        total_reward: 0.0,
    };

    while summary.steps < max_steps {
        let action = policy.act(&observation);
        let result = client.step(action).await?;
        summary.steps += 1;
        summary.total_reward += result.reward;
        observation = result.observation;
        debug!(
            "step {} action {} reward {} done {}",
            summary.steps, action, result.reward, result.done
        );
        if result.done {
            break;
        }
    }

    info!(
        "Episode finished after {} steps, reward {:.1}",
        summary.steps, summary.total_reward
    );
    Ok(summary)
}

/// Mean reward over a set of episodes, `None` if there are none.
pub fn mean_reward(episodes: &[EpisodeSummary]) -> Option<f64> {
    if episodes.is_empty() {
        return None;
    }
    let total: f64 = episodes.iter().map(|e| e.total_reward).sum();
    Some(total / episodes.len() as f64)
}
