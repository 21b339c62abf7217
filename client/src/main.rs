use clap::Parser;
use client::policy::PolicyKind;
use client::{game, network};
use log::{info, warn};
use shared::{BASE_PORT, DEFAULT_HOST};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port of the simulation instance
    #[arg(short = 'p', long, default_value_t = BASE_PORT)]
    port: u16,

    /// Episodes to play
    #[arg(short = 'e', long, default_value = "5")]
    episodes: u32,

    /// Step cap per episode
    #[arg(long, default_value = "500")]
    max_steps: u32,

    /// Action policy: random or balance
    #[arg(long, default_value = "balance")]
    policy: PolicyKind,

    /// Seed for the random policy
    #[arg(short = 's', long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    info!("Connecting to: {}", addr);
    let mut client = network::SimClient::connect(&addr).await?;

    let space = client.info().await?;
    info!(
        "Instance reports {} observation components, {} actions",
        space.observation_len, space.action_count
    );

    let mut policy = args.policy.build(space.action_count, args.seed);
    let mut episodes = Vec::with_capacity(args.episodes as usize);
    for episode in 0..args.episodes {
        let summary = game::run_episode(&mut client, policy.as_mut(), args.max_steps).await?;
        info!("Episode {}: {} steps", episode + 1, summary.steps);
        episodes.push(summary);
    }

    match game::mean_reward(&episodes) {
        Some(mean) => info!("Mean reward over {} episodes: {:.2}", episodes.len(), mean),
        None => warn!("No episodes played"),
    }

    Ok(())
}
