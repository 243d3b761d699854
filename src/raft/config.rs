use std::time::Duration;

use super::Node;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub name: String,
    pub address: String,
    pub peers: Vec<Node>,
    pub election_timeout: u64,        // in milliseconds
    pub watchdog_poll_interval: u64,  // in milliseconds
    pub canvass_interval_min: u64,    // in milliseconds
    pub canvass_interval_max: u64,    // in milliseconds
    pub heartbeat_interval_min: u64,  // in milliseconds
    pub heartbeat_interval_max: u64,  // in milliseconds
}

impl RaftConfig {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            peers: Vec::new(),
            election_timeout: 2000,
            watchdog_poll_interval: 300,
            canvass_interval_min: 1500,
            canvass_interval_max: 3000,
            heartbeat_interval_min: 100,
            heartbeat_interval_max: 150,
        }
    }

    pub fn add_peer(&mut self, name: &str, address: &str) {
        self.peers.push(Node::new(name, address));
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout)
    }

    pub fn watchdog_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_poll_interval)
    }
}
