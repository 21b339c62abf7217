//! Pool supervisor: one instance server per simulation, each on its own task.
//!
//! Instances share nothing. A bind failure or crash in one instance is logged
//! and reported but never touches its siblings, and nothing is restarted.

use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::instance::SimulationInstance;
use crate::network::{InstanceServer, InstanceStats};
use crate::oracle::{OracleFactory, SimulationOracle};
use crate::physics::CartPole;

/// How each instance of a pool ended.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub completed: Vec<(usize, InstanceStats)>,
    pub bind_failures: Vec<(usize, String)>,
    pub failed: Vec<(usize, String)>,
}

impl PoolReport {
    pub fn all_completed(&self) -> bool {
        self.bind_failures.is_empty() && self.failed.is_empty()
    }
}

pub struct Pool;

impl Pool {
    /// Binds a cart-pole pool described by `config`.
    pub fn bind(config: &ServerConfig) -> Result<BoundPool, ServerError> {
        let seeds = config.clone();
        let max_steps = config.max_episode_steps;
        let factory: Arc<OracleFactory> = Arc::new(move |index| {
            Box::new(CartPole::new(seeds.seed_for(index), max_steps)) as Box<dyn SimulationOracle>
        });
        Self::bind_with(config, factory)
    }

    /// Binds a pool whose oracles come from `factory`. Only configuration
    /// errors fail the whole pool; a port that cannot be bound only costs its
    /// own instance.
    pub fn bind_with(
        config: &ServerConfig,
        factory: Arc<OracleFactory>,
    ) -> Result<BoundPool, ServerError> {
        config.validate()?;

        let mut servers = Vec::with_capacity(config.instances);
        let mut bind_failures = Vec::new();

        for index in 0..config.instances {
            let addr = config.addr_for(index)?;
            let renders = config.render_instance == Some(index);
            let instance = SimulationInstance::new(index, factory(index), renders);

            match InstanceServer::bind(addr, config.backlog, instance) {
                Ok(server) => servers.push(server),
                Err(e) => {
                    error!("Instance {} unavailable: {}", index, e);
                    bind_failures.push((index, e.to_string()));
                }
            }
        }

        info!(
            "Pool bound {} of {} instances",
            servers.len(),
            config.instances
        );
        Ok(BoundPool {
            servers,
            bind_failures,
        })
    }
}

pub struct BoundPool {
    servers: Vec<InstanceServer>,
    bind_failures: Vec<(usize, String)>,
}

impl BoundPool {
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn bind_failures(&self) -> &[(usize, String)] {
        &self.bind_failures
    }

    pub fn local_addrs(&self) -> Vec<(usize, SocketAddr)> {
        self.servers
            .iter()
            .filter_map(|server| server.local_addr().ok().map(|addr| (server.index(), addr)))
            .collect()
    }

    /// Runs every instance on its own task and waits until all have stopped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> PoolReport {
        let handles: Vec<_> = self
            .servers
            .into_iter()
            .map(|server| {
                let index = server.index();
                (index, tokio::spawn(server.run(shutdown.clone())))
            })
            .collect();

        let mut report = PoolReport {
            bind_failures: self.bind_failures,
            ..PoolReport::default()
        };

        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(stats)) => report.completed.push((index, stats)),
                Ok(Err(e)) => {
                    warn!("Instance {} stopped with error: {}", index, e);
                    report.failed.push((index, e.to_string()));
                }
                Err(e) => {
                    error!("Instance {} task failed: {}", index, e);
                    report.failed.push((index, e.to_string()));
                }
            }
        }

        info!(
            "Pool stopped: {} completed, {} failed, {} never bound",
            report.completed.len(),
            report.failed.len(),
            report.bind_failures.len()
        );
        report
    }
}
