use serde::{Deserialize, Serialize};
use shared::{port_for, BASE_PORT, DEFAULT_HOST, LISTEN_BACKLOG};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::error::ServerError;
use crate::physics::DEFAULT_MAX_EPISODE_STEPS;

pub const DEFAULT_INSTANCES: usize = 32;

/// Pool settings. Every field has a default, so a config file only needs the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub base_port: u16,
    pub instances: usize,
    pub backlog: u32,
    /// Index of the instance that runs the render side-channel.
    pub render_instance: Option<usize>,
    pub max_episode_steps: u32,
    /// Instance `i` is seeded with `seed + i`; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            base_port: BASE_PORT,
            instances: DEFAULT_INSTANCES,
            backlog: LISTEN_BACKLOG,
            render_instance: Some(0),
            max_episode_steps: DEFAULT_MAX_EPISODE_STEPS,
            seed: None,
        }
    }
}

impl ServerConfig {
    pub fn from_json(text: &str) -> Result<Self, ServerError> {
        serde_json::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.instances == 0 {
            return Err(ServerError::Config("instances must be at least 1".into()));
        }
        if self.max_episode_steps == 0 {
            return Err(ServerError::Config(
                "max_episode_steps must be at least 1".into(),
            ));
        }
        self.host_ip()?;
        let last = self.instances - 1;
        if port_for(self.base_port, last).is_none() {
            return Err(ServerError::PortOverflow {
                base: self.base_port,
                index: last,
            });
        }
        Ok(())
    }

    fn host_ip(&self) -> Result<IpAddr, ServerError> {
        self.host
            .parse()
            .map_err(|_| ServerError::Config(format!("invalid host address: {}", self.host)))
    }

    /// Listening address of instance `index`. A base port of 0 lets the OS
    /// pick a free port for every instance.
    pub fn addr_for(&self, index: usize) -> Result<SocketAddr, ServerError> {
        let port = if self.base_port == 0 {
            0
        } else {
            port_for(self.base_port, index).ok_or(ServerError::PortOverflow {
                base: self.base_port,
                index,
            })?
        };
        Ok(SocketAddr::new(self.host_ip()?, port))
    }

    pub fn seed_for(&self, index: usize) -> Option<u64> {
        self.seed.map(|seed| seed.wrapping_add(index as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_layout() {
        let config = ServerConfig::default();
        assert_eq!(config.addr_for(0).unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.addr_for(31).unwrap().port(), 8111);
        assert_eq!(config.backlog, 10);
        assert_eq!(config.render_instance, Some(0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config =
            ServerConfig::from_json(r#"{"instances": 3, "base_port": 9000, "seed": 5}"#).unwrap();
        assert_eq!(config.instances, 3);
        assert_eq!(config.base_port, 9000);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.seed_for(2), Some(7));
        assert_eq!(ServerConfig::default().seed_for(2), None);
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(matches!(
            ServerConfig::from_json("{\"instances\": \"many\"}"),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig {
            instances: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));

        config.instances = 10;
        config.base_port = u16::MAX - 3;
        assert!(matches!(
            config.validate(),
            Err(ServerError::PortOverflow { index: 9, .. })
        ));

        config.base_port = 8080;
        config.host = "not-an-ip".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ephemeral_base_port() {
        let config = ServerConfig {
            base_port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.addr_for(0).unwrap().port(), 0);
        assert_eq!(config.addr_for(5).unwrap().port(), 0);
    }
}
