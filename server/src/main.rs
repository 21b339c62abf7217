use clap::Parser;
use log::{error, info, warn};
use server::config::ServerConfig;
use server::pool::Pool;
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with pool settings; flags below override it
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Address to bind every instance to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port of instance 0; instance i listens on base_port + i
    #[arg(short = 'p', long)]
    base_port: Option<u16>,

    /// Number of simulation instances
    #[arg(short = 'n', long)]
    instances: Option<usize>,

    /// Steps before an episode is cut off
    #[arg(long)]
    max_episode_steps: Option<u32>,

    /// Seed for reproducible episodes (instance i uses seed + i)
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// Disable the render side-channel on instance 0
    #[arg(long)]
    no_render: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(base_port) = self.base_port {
            config.base_port = base_port;
        }
        if let Some(instances) = self.instances {
            config.instances = instances;
        }
        if let Some(max_episode_steps) = self.max_episode_steps {
            config.max_episode_steps = max_episode_steps;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.no_render {
            config.render_instance = None;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config()?;
    info!(
        "Starting {} instances on {}:{}..",
        config.instances, config.host, config.base_port
    );

    let pool = Pool::bind(&config)?;
    if pool.is_empty() {
        error!("No instance could bind, exiting");
        return Err("no instance could bind".into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would read as a shutdown request.
                error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    let report = pool.run(shutdown_rx).await;
    for (index, reason) in report.bind_failures.iter().chain(report.failed.iter()) {
        warn!("Instance {}: {}", index, reason);
    }

    Ok(())
}
