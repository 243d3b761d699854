use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::TransportConfig;
use crate::raft::RaftConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed peer entry '{0}', expected name=host:port")]
    MalformedPeer(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub address: String,
}

/// Settings for one node process. Every field has a default so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    /// Peer RPC listen address.
    pub address: String,
    pub http_address: String,
    pub data_dir: String,
    pub peers: Vec<PeerConfig>,

    pub election_timeout_ms: u64,
    pub watchdog_poll_ms: u64,
    pub canvass_interval_min_ms: u64,
    pub canvass_interval_max_ms: u64,
    pub heartbeat_interval_min_ms: u64,
    pub heartbeat_interval_max_ms: u64,

    pub retry_backoff_ms: u64,
    pub call_timeout_ms: u64,
    pub failure_queue_capacity: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "n1".to_string(),
            address: "127.0.0.1:9001".to_string(),
            http_address: "127.0.0.1:8001".to_string(),
            data_dir: "data".to_string(),
            peers: vec![],
            election_timeout_ms: 2000,
            watchdog_poll_ms: 300,
            canvass_interval_min_ms: 1500,
            canvass_interval_max_ms: 3000,
            heartbeat_interval_min_ms: 100,
            heartbeat_interval_max_ms: 150,
            retry_backoff_ms: 500,
            call_timeout_ms: 1000,
            failure_queue_capacity: 10,
            shutdown_grace_ms: 1000,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Parse a `name=host:port,name=host:port` roster. Entries naming `me`
    /// are dropped.
    pub fn parse_peers(raw: &str, me: &str) -> Result<Vec<PeerConfig>, ConfigError> {
        let mut peers = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, address) = entry
                .split_once('=')
                .map(|(n, a)| (n.trim(), a.trim()))
                .filter(|(n, a)| !n.is_empty() && !a.is_empty())
                .ok_or_else(|| ConfigError::MalformedPeer(entry.to_string()))?;

            if name == me {
                continue;
            }
            peers.push(PeerConfig {
                name: name.to_string(),
                address: address.to_string(),
            });
        }
        Ok(peers)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("node name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        seen.insert(self.name.as_str());
        for peer in &self.peers {
            if !seen.insert(peer.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate node name '{}' in roster",
                    peer.name
                )));
            }
        }

        if self.canvass_interval_min_ms > self.canvass_interval_max_ms {
            return Err(ConfigError::Invalid(format!(
                "canvass interval range {}..{} is inverted",
                self.canvass_interval_min_ms, self.canvass_interval_max_ms
            )));
        }
        if self.heartbeat_interval_min_ms > self.heartbeat_interval_max_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat interval range {}..{} is inverted",
                self.heartbeat_interval_min_ms, self.heartbeat_interval_max_ms
            )));
        }
        if self.failure_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "failure queue capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(format!("{}.log", self.name))
    }

    pub fn raft_config(&self) -> RaftConfig {
        let mut config = RaftConfig::new(&self.name, &self.address);
        config.election_timeout = self.election_timeout_ms;
        config.watchdog_poll_interval = self.watchdog_poll_ms;
        config.canvass_interval_min = self.canvass_interval_min_ms;
        config.canvass_interval_max = self.canvass_interval_max_ms;
        config.heartbeat_interval_min = self.heartbeat_interval_min_ms;
        config.heartbeat_interval_max = self.heartbeat_interval_max_ms;
        for peer in &self.peers {
            config.add_peer(&peer.name, &peer.address);
        }
        config
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            queue_capacity: self.failure_queue_capacity,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
