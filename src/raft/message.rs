use serde::{Deserialize, Serialize};

use super::Node;

pub const METHOD_PUT: &str = "PUT";

/// A client write. Opaque to the consensus core, interpreted by the Store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub value: String,
    pub method: String,
    /// Set for writes that must be appended to the durable log before being
    /// applied; cleared for entries applied straight to the key-value state.
    pub is_put_log: bool,
}

impl LogEntry {
    pub fn put(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            method: METHOD_PUT.to_string(),
            is_put_log: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    VoteRequest,
    VoteResponse,
    Heartbeat,
    ReplicateEntry,
}

/// Envelope used for every peer RPC, in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMsg {
    pub command: CommandKind,
    pub msg: String,
    pub entry: Option<LogEntry>,
    /// Snapshot of the sending (or, in replies, the echoing) node. `None` when
    /// a reply deliberately carries no node, e.g. a denied stale vote request.
    pub node: Option<Node>,
    pub vote_granted: bool,
    pub error: Option<String>,
}

impl CommandMsg {
    pub fn new(command: CommandKind, node: Option<Node>) -> Self {
        Self {
            command,
            msg: String::new(),
            entry: None,
            node,
            vote_granted: false,
            error: None,
        }
    }

    pub fn heartbeat(sender: Node) -> Self {
        Self::new(CommandKind::Heartbeat, Some(sender))
    }

    pub fn vote_request(sender: Node) -> Self {
        Self::new(CommandKind::VoteRequest, Some(sender))
    }

    pub fn replicate(sender: Node, entry: LogEntry) -> Self {
        let mut msg = Self::new(CommandKind::ReplicateEntry, Some(sender));
        msg.entry = Some(entry);
        msg
    }

    /// The sender snapshot, or a default node for envelopes that arrived without one.
    pub fn sender(&self) -> Node {
        self.node.clone().unwrap_or_default()
    }
}
