use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    #[default]
    Follower,
    Candidate,
    Leader,
}

/// A cluster member as seen by this process.
///
/// The local node's copy is authoritative and owned by the engine's event
/// loop. Peer copies are advisory snapshots refreshed from inbound heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: String,
    pub role: NodeRole,
    pub term: u64,
    /// Name of the node this member believes is leader; empty when unknown.
    pub leader_name: String,
    /// True while the node still has its vote for the current term.
    pub vote_granted: bool,
    /// Grants collected in the current candidacy.
    pub vote_count: u64,
}

impl Node {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            role: NodeRole::Follower,
            term: 0,
            leader_name: String::new(),
            vote_granted: true,
            vote_count: 0,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == NodeRole::Leader
    }

    pub fn leader(&self) -> Option<&str> {
        if self.leader_name.is_empty() {
            None
        } else {
            Some(&self.leader_name)
        }
    }
}

/// Point-in-time copy of the local node and its cached peer records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub me: Node,
    pub peers: Vec<Node>,
}
