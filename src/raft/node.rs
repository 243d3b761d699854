use std::collections::HashMap;
use std::time::Instant;
use log::{debug, info};

use super::{ClusterView, CommandKind, CommandMsg, Node, NodeRole, RaftConfig};

/// Vote threshold for leaving candidacy: at least one grant, and at least
/// half of the known peers (integer division, self not counted).
pub fn has_quorum(votes: u64, peer_count: usize) -> bool {
    votes > 0 && votes >= (peer_count / 2) as u64
}

/// Role, term and vote bookkeeping for the local node.
///
/// Every method is synchronous and is only ever called from the engine's
/// event loop, which gives all mutations a single total order.
pub struct RaftNode {
    me: Node,
    peers: HashMap<String, Node>,
    config: RaftConfig,
    last_heartbeat: Instant,
}

impl RaftNode {
    pub fn new(config: RaftConfig) -> Self {
        let peers = config
            .peers
            .iter()
            .map(|peer| (peer.name.clone(), peer.clone()))
            .collect();

        Self {
            me: Node::new(&config.name, &config.address),
            peers,
            config,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn node(&self) -> &Node {
        &self.me
    }

    pub fn peer(&self, name: &str) -> Option<&Node> {
        self.peers.get(name)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_leader(&self) -> bool {
        self.me.is_leader()
    }

    pub fn view(&self) -> ClusterView {
        let mut peers: Vec<Node> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        ClusterView {
            me: self.me.clone(),
            peers,
        }
    }

    pub fn election_timeout_elapsed(&self) -> bool {
        self.last_heartbeat.elapsed() > self.config.election_timeout()
    }

    /// Follower -> Candidate once no heartbeat has been seen for the election
    /// timeout. Returns whether the transition happened.
    pub fn on_election_timeout(&mut self) -> bool {
        if self.me.role != NodeRole::Follower || !self.election_timeout_elapsed() {
            return false;
        }

        info!(
            "Node {} saw no heartbeat for {:?}, becoming candidate in term {}",
            self.me.name,
            self.last_heartbeat.elapsed(),
            self.me.term
        );
        self.me.role = NodeRole::Candidate;
        self.me.vote_count = 0;
        true
    }

    /// Count one granted vote collected during a canvass round started in
    /// `term`. Returns true only on the Candidate -> Leader transition, so a
    /// round raises the term at most once.
    pub fn record_vote(&mut self, term: u64) -> bool {
        if self.me.role != NodeRole::Candidate || self.me.term != term {
            debug!(
                "Node {} ignoring stale vote for term {} (role {:?}, term {})",
                self.me.name, term, self.me.role, self.me.term
            );
            return false;
        }

        self.me.vote_count += 1;
        debug!(
            "Node {} has {} vote(s) of {} peer(s)",
            self.me.name,
            self.me.vote_count,
            self.peers.len()
        );

        if has_quorum(self.me.vote_count, self.peers.len()) {
            self.become_leader();
            return true;
        }
        false
    }

    fn become_leader(&mut self) {
        self.me.leader_name = self.me.name.clone();
        self.me.role = NodeRole::Leader;
        self.me.term += 1;
        info!(
            "Node {} becoming leader for term {} with {} vote(s)",
            self.me.name, self.me.term, self.me.vote_count
        );
    }

    /// Inbound heartbeat. The sender is adopted as leader whatever its term.
    pub fn handle_heartbeat(&mut self, request: &CommandMsg) -> CommandMsg {
        let sender = request.sender();
        self.last_heartbeat = Instant::now();
        self.update_peer(&sender);

        if self.me.role != NodeRole::Follower {
            info!(
                "Node {} stepping down from {:?}, leader is {}",
                self.me.name, self.me.role, sender.name
            );
        }
        self.me.leader_name = sender.name.clone();
        self.me.role = NodeRole::Follower;

        let mut response = CommandMsg::new(CommandKind::Heartbeat, None);
        if self.me.term == sender.term {
            response.node = Some(self.me.clone());
        } else if self.me.term < sender.term {
            debug!(
                "Node {} adopting term {} from {}",
                self.me.name, sender.term, sender.name
            );
            self.me.term = sender.term;
        }
        response
    }

    pub fn handle_vote_request(&mut self, request: &CommandMsg) -> CommandMsg {
        let candidate = request.sender();
        let mut response = CommandMsg::new(CommandKind::VoteResponse, None);

        if candidate.term < self.me.term {
            debug!(
                "Node {} denying vote to {}: term {} < {}",
                self.me.name, candidate.name, candidate.term, self.me.term
            );
            return response;
        }

        response.vote_granted = self.me.vote_granted;
        response.node = Some(self.me.clone());
        if self.me.vote_granted {
            self.me.vote_granted = false;
        }

        debug!(
            "Node {} answered vote request from {}: granted={}",
            self.me.name, candidate.name, response.vote_granted
        );
        response
    }

    /// Refresh the cached record of a known peer. Hearing from any known peer
    /// also gives this node its vote back and clears its tally.
    fn update_peer(&mut self, sender: &Node) {
        if let Some(peer) = self.peers.get_mut(&sender.name) {
            peer.role = sender.role;
            peer.leader_name = sender.leader_name.clone();

            self.me.vote_count = 0;
            self.me.vote_granted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config_with_peers(name: &str, peers: &[&str]) -> RaftConfig {
        let mut cfg = RaftConfig::new(name, "127.0.0.1:7000");
        for (i, peer) in peers.iter().enumerate() {
            cfg.add_peer(peer, &format!("127.0.0.1:{}", 7001 + i));
        }
        cfg
    }

    fn candidate(name: &str, peers: &[&str]) -> RaftNode {
        let mut cfg = config_with_peers(name, peers);
        cfg.election_timeout = 0;
        let mut node = RaftNode::new(cfg);
        std::thread::sleep(Duration::from_millis(2));
        assert!(node.on_election_timeout());
        node
    }

    fn sender(name: &str, role: NodeRole, term: u64) -> Node {
        let mut node = Node::new(name, "127.0.0.1:9999");
        node.role = role;
        node.term = term;
        node
    }

    #[test]
    fn quorum_uses_half_the_peer_count() {
        assert!(!has_quorum(0, 0));
        assert!(has_quorum(1, 0));
        assert!(has_quorum(1, 2));
        assert!(has_quorum(1, 3));
        assert!(!has_quorum(1, 4));
        assert!(has_quorum(2, 4));
        assert!(!has_quorum(0, 1));
    }

    #[test]
    fn follower_stays_put_before_election_timeout() {
        let mut node = RaftNode::new(config_with_peers("n1", &["n2", "n3"]));
        assert!(!node.on_election_timeout());
        assert_eq!(node.node().role, NodeRole::Follower);
    }

    #[test]
    fn election_timeout_turns_follower_into_candidate() {
        let node = candidate("n1", &["n2", "n3"]);
        assert_eq!(node.node().role, NodeRole::Candidate);
        assert_eq!(node.node().term, 0);
    }

    #[test]
    fn candidate_with_enough_grants_becomes_leader_once() {
        let mut node = candidate("n1", &["n2", "n3", "n4", "n5"]);

        assert!(!node.record_vote(0));
        assert_eq!(node.node().role, NodeRole::Candidate);

        assert!(node.record_vote(0));
        assert_eq!(node.node().role, NodeRole::Leader);
        assert_eq!(node.node().term, 1);
        assert_eq!(node.node().leader_name, "n1");

        // A late grant from the same round must not bump the term again.
        assert!(!node.record_vote(0));
        assert_eq!(node.node().term, 1);
    }

    #[test]
    fn votes_for_an_older_round_are_ignored() {
        let mut node = candidate("n1", &["n2", "n3"]);
        node.me.term = 3;
        assert!(!node.record_vote(2));
        assert_eq!(node.node().vote_count, 0);
    }

    #[test]
    fn heartbeat_demotes_leader_whatever_the_term() {
        let mut node = candidate("n1", &["n2", "n3"]);
        assert!(node.record_vote(0));
        assert!(node.is_leader());

        // Sender is behind us, yet we still follow it.
        let request = CommandMsg::heartbeat(sender("n2", NodeRole::Leader, 0));
        let response = node.handle_heartbeat(&request);

        assert_eq!(node.node().role, NodeRole::Follower);
        assert_eq!(node.node().leader_name, "n2");
        assert_eq!(node.node().term, 1);
        assert!(response.node.is_none());
    }

    #[test]
    fn heartbeat_echoes_node_on_equal_term_and_adopts_higher_term() {
        let mut node = RaftNode::new(config_with_peers("n1", &["n2"]));

        let response = node.handle_heartbeat(&CommandMsg::heartbeat(sender(
            "n2",
            NodeRole::Leader,
            0,
        )));
        let echoed = response.node.expect("equal term echoes our node");
        assert_eq!(echoed.name, "n1");
        assert_eq!(echoed.leader_name, "n2");

        let response = node.handle_heartbeat(&CommandMsg::heartbeat(sender(
            "n2",
            NodeRole::Leader,
            4,
        )));
        assert!(response.node.is_none());
        assert_eq!(node.node().term, 4);
    }

    #[test]
    fn heartbeat_from_known_peer_updates_cache_and_restores_vote() {
        let mut node = RaftNode::new(config_with_peers("n1", &["n2", "n3"]));
        let granted = node.handle_vote_request(&CommandMsg::vote_request(sender(
            "n3",
            NodeRole::Candidate,
            0,
        )));
        assert!(granted.vote_granted);
        assert!(!node.node().vote_granted);

        let mut leader = sender("n2", NodeRole::Leader, 0);
        leader.leader_name = "n2".to_string();
        node.handle_heartbeat(&CommandMsg::heartbeat(leader));

        assert!(node.node().vote_granted);
        assert_eq!(node.node().vote_count, 0);
        let cached = node.peer("n2").expect("peer cached");
        assert_eq!(cached.role, NodeRole::Leader);
        assert_eq!(cached.leader_name, "n2");
    }

    #[test]
    fn heartbeat_from_unknown_sender_leaves_vote_spent() {
        let mut node = RaftNode::new(config_with_peers("n1", &["n2"]));
        node.handle_vote_request(&CommandMsg::vote_request(sender(
            "n2",
            NodeRole::Candidate,
            0,
        )));
        node.handle_heartbeat(&CommandMsg::heartbeat(sender("stranger", NodeRole::Leader, 0)));

        assert!(!node.node().vote_granted);
        assert_eq!(node.node().leader_name, "stranger");
        assert_eq!(node.node().role, NodeRole::Follower);
    }

    #[test]
    fn vote_request_from_lower_term_is_denied_even_with_vote_available() {
        let mut node = RaftNode::new(config_with_peers("n1", &["n2"]));
        node.me.term = 5;
        assert!(node.node().vote_granted);

        let response =
            node.handle_vote_request(&CommandMsg::vote_request(sender("n2", NodeRole::Candidate, 4)));
        assert!(!response.vote_granted);
        assert!(response.node.is_none());
        assert!(node.node().vote_granted);
    }

    #[test]
    fn at_most_one_vote_per_term() {
        let mut node = RaftNode::new(config_with_peers("n1", &["n2", "n3"]));

        let first =
            node.handle_vote_request(&CommandMsg::vote_request(sender("n2", NodeRole::Candidate, 0)));
        let second =
            node.handle_vote_request(&CommandMsg::vote_request(sender("n3", NodeRole::Candidate, 0)));

        assert!(first.vote_granted);
        assert!(!second.vote_granted);
        assert_eq!(second.node.map(|n| n.name).as_deref(), Some("n1"));
    }

    #[test]
    fn view_lists_peers_by_name() {
        let node = RaftNode::new(config_with_peers("n1", &["n3", "n2"]));
        let view = node.view();
        assert_eq!(view.me.name, "n1");
        let names: Vec<_> = view.peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["n2", "n3"]);
        assert_eq!(node.peer_count(), 2);
    }
}
