use super::proto;
use crate::raft::{CommandKind, CommandMsg, LogEntry, Node, NodeRole};

impl From<NodeRole> for proto::Role {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Follower => proto::Role::Follower,
            NodeRole::Candidate => proto::Role::Candidate,
            NodeRole::Leader => proto::Role::Leader,
        }
    }
}

impl From<proto::Role> for NodeRole {
    fn from(role: proto::Role) -> Self {
        match role {
            proto::Role::Follower => NodeRole::Follower,
            proto::Role::Candidate => NodeRole::Candidate,
            proto::Role::Leader => NodeRole::Leader,
        }
    }
}

impl From<CommandKind> for proto::Command {
    fn from(kind: CommandKind) -> Self {
        match kind {
            CommandKind::VoteRequest => proto::Command::VoteRequest,
            CommandKind::VoteResponse => proto::Command::VoteResponse,
            CommandKind::Heartbeat => proto::Command::Heartbeat,
            CommandKind::ReplicateEntry => proto::Command::ReplicateEntry,
        }
    }
}

impl From<proto::Command> for CommandKind {
    fn from(command: proto::Command) -> Self {
        match command {
            proto::Command::VoteRequest => CommandKind::VoteRequest,
            proto::Command::VoteResponse => CommandKind::VoteResponse,
            proto::Command::Heartbeat => CommandKind::Heartbeat,
            proto::Command::ReplicateEntry => CommandKind::ReplicateEntry,
        }
    }
}

impl From<Node> for proto::NodeInfo {
    fn from(node: Node) -> Self {
        Self {
            name: node.name,
            address: node.address,
            role: proto::Role::from(node.role) as i32,
            term: node.term,
            leader_name: node.leader_name,
            vote_granted: node.vote_granted,
            vote_count: node.vote_count,
        }
    }
}

impl From<proto::NodeInfo> for Node {
    fn from(info: proto::NodeInfo) -> Self {
        // Unknown role values decode as Follower.
        let role = NodeRole::from(info.role());
        Self {
            name: info.name,
            address: info.address,
            role,
            term: info.term,
            leader_name: info.leader_name,
            vote_granted: info.vote_granted,
            vote_count: info.vote_count,
        }
    }
}

impl From<LogEntry> for proto::LogEntry {
    fn from(entry: LogEntry) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            method: entry.method,
            is_put_log: entry.is_put_log,
        }
    }
}

impl From<proto::LogEntry> for LogEntry {
    fn from(entry: proto::LogEntry) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            method: entry.method,
            is_put_log: entry.is_put_log,
        }
    }
}

impl From<CommandMsg> for proto::CommandMsg {
    fn from(msg: CommandMsg) -> Self {
        Self {
            command: proto::Command::from(msg.command) as i32,
            msg: msg.msg,
            entry: msg.entry.map(Into::into),
            node: msg.node.map(Into::into),
            vote_granted: msg.vote_granted,
            error: msg.error,
        }
    }
}

impl From<proto::CommandMsg> for CommandMsg {
    fn from(msg: proto::CommandMsg) -> Self {
        let command = CommandKind::from(msg.command());
        Self {
            command,
            msg: msg.msg,
            entry: msg.entry.map(Into::into),
            node: msg.node.map(Into::into),
            vote_granted: msg.vote_granted,
            error: msg.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replicate_envelope_survives_the_wire_shape() {
        let mut leader = Node::new("n1", "127.0.0.1:7001");
        leader.role = NodeRole::Leader;
        leader.term = 3;
        leader.leader_name = "n1".to_string();

        let mut msg = CommandMsg::replicate(leader.clone(), LogEntry::put("k", "v"));
        msg.error = Some("boom".to_string());

        let back = CommandMsg::from(proto::CommandMsg::from(msg.clone()));
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_enum_values_fall_back_to_defaults() {
        let wire = proto::CommandMsg {
            command: 42,
            node: Some(proto::NodeInfo {
                name: "n2".to_string(),
                role: 9,
                ..Default::default()
            }),
            ..Default::default()
        };

        let msg = CommandMsg::from(wire);
        assert_eq!(msg.command, CommandKind::VoteRequest);
        assert_eq!(msg.sender().role, NodeRole::Follower);
        assert!(msg.entry.is_none());
        assert!(msg.error.is_none());
    }
}
