mod config;
mod error;
mod message;
mod node;
mod state;

pub use self::config::RaftConfig;
pub use self::error::RaftError;
pub use self::message::{CommandKind, CommandMsg, LogEntry, METHOD_PUT};
pub use self::node::{has_quorum, RaftNode};
pub use self::state::{ClusterView, Node, NodeRole};

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn};

use crate::network::{RpcMethod, Transport};
use crate::storage::Store;

/// Intents submitted to the event loop that owns the local node. Timer tasks
/// and RPC handlers never touch role, term or vote state directly.
enum Event {
    Heartbeat {
        request: CommandMsg,
        reply: oneshot::Sender<CommandMsg>,
    },
    VoteRequest {
        request: CommandMsg,
        reply: oneshot::Sender<CommandMsg>,
    },
    VoteGranted {
        term: u64,
        reply: oneshot::Sender<bool>,
    },
    ElectionTimeout,
    Snapshot {
        reply: oneshot::Sender<ClusterView>,
    },
}

struct EventLoop {
    node: RaftNode,
    events: mpsc::Receiver<Event>,
    heartbeat_signal: mpsc::Sender<Instant>,
}

impl EventLoop {
    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }
        debug!("Event loop for {} stopped", self.node.node().name);
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Heartbeat { request, reply } => {
                let response = self.node.handle_heartbeat(&request);
                // Dropped when the watchdog has not consumed the previous one.
                let _ = self.heartbeat_signal.try_send(Instant::now());
                let _ = reply.send(response);
            }
            Event::VoteRequest { request, reply } => {
                let _ = reply.send(self.node.handle_vote_request(&request));
            }
            Event::VoteGranted { term, reply } => {
                let _ = reply.send(self.node.record_vote(term));
            }
            Event::ElectionTimeout => {
                self.node.on_election_timeout();
            }
            Event::Snapshot { reply } => {
                let _ = reply.send(self.node.view());
            }
        }
    }
}

fn random_interval(min_ms: u64, max_ms: u64) -> Duration {
    if min_ms >= max_ms {
        return Duration::from_millis(max_ms);
    }
    let mut rng = rand::rng();
    Duration::from_millis(rng.random_range(min_ms..max_ms))
}

/// Consensus engine for one node.
pub struct Raft {
    name: String,
    peers: Vec<Node>,
    config: RaftConfig,
    events: mpsc::Sender<Event>,
    watchdog_signal: Mutex<Option<mpsc::Receiver<Instant>>>,
    transport: Transport,
    store: Arc<dyn Store>,
    shutdown: CancellationToken,
}

impl Raft {
    /// Spawns the event loop that owns the local node; timers start with
    /// [`Raft::start`]. Must be called inside a tokio runtime.
    pub fn new(config: RaftConfig, store: Arc<dyn Store>, transport: Transport) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (signal_tx, signal_rx) = mpsc::channel(1);

        let event_loop = EventLoop {
            node: RaftNode::new(config.clone()),
            events: events_rx,
            heartbeat_signal: signal_tx,
        };
        tokio::spawn(event_loop.run());

        Arc::new(Self {
            name: config.name.clone(),
            peers: config.peers.clone(),
            config,
            events: events_tx,
            watchdog_signal: Mutex::new(Some(signal_rx)),
            transport,
            store,
            shutdown: CancellationToken::new(),
        })
    }

    /// Replay the store, dial every peer and start the watchdog, heartbeat
    /// and canvass tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), RaftError> {
        // Held across the replay; a failed replay leaves the node startable.
        let mut slot = self.watchdog_signal.lock().await;
        if slot.is_none() {
            return Err(RaftError::AlreadyStarted);
        }

        let replayed = self.store.read_log_command(0)?;
        info!("Node {} replayed {replayed} log entries", self.name);

        let signal = slot.take().ok_or(RaftError::AlreadyStarted)?;
        drop(slot);

        for peer in &self.peers {
            let transport = self.transport.clone();
            let peer = peer.clone();
            tokio::spawn(async move { transport.connect(&peer).await });
        }

        tokio::spawn(Arc::clone(self).listen_timeout(signal));
        tokio::spawn(Arc::clone(self).heartbeat_task());
        tokio::spawn(Arc::clone(self).canvass_task());

        info!(
            "Node {} started with {} peer(s)",
            self.name,
            self.peers.len()
        );
        Ok(())
    }

    /// Stop accepting proposals and stop the background tasks. Calls already
    /// in flight run to completion.
    pub fn shutdown(&self) {
        info!("Node {} shutting down", self.name);
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn submit<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> Event,
    ) -> Result<T, RaftError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(event(tx))
            .await
            .map_err(|_| RaftError::NotRunning)?;
        rx.await.map_err(|_| RaftError::NotRunning)
    }

    pub async fn status(&self) -> Result<ClusterView, RaftError> {
        self.submit(|reply| Event::Snapshot { reply }).await
    }

    async fn me(&self) -> Result<Node, RaftError> {
        Ok(self.status().await?.me)
    }

    // --- Tasks ---

    async fn canvass_task(self: Arc<Self>) {
        loop {
            let wait = random_interval(
                self.config.canvass_interval_min,
                self.config.canvass_interval_max,
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }

            match self.me().await {
                Ok(me) if me.role != NodeRole::Leader => {
                    if let Err(e) = self.request_canvass().await {
                        warn!("Canvass round on {} failed: {e}", self.name);
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    async fn heartbeat_task(self: Arc<Self>) {
        loop {
            let wait = random_interval(
                self.config.heartbeat_interval_min,
                self.config.heartbeat_interval_max,
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }

            if let Err(e) = self.send_heartbeat().await {
                debug!("Heartbeat task on {} stopping: {e}", self.name);
                break;
            }
        }
    }

    async fn listen_timeout(self: Arc<Self>, mut signal: mpsc::Receiver<Instant>) {
        let election_timeout = self.config.election_timeout();
        let poll = self.config.watchdog_poll_interval();
        let mut last_heartbeat = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(at) = signal.recv() => last_heartbeat = at,
                _ = sleep(poll) => {}
            }

            if last_heartbeat.elapsed() > election_timeout
                && self.events.send(Event::ElectionTimeout).await.is_err()
            {
                break;
            }
        }
    }

    // --- Logic ---

    /// One election round: ask every peer for its vote while Candidate.
    /// Returns whether this round made the node leader.
    pub async fn request_canvass(&self) -> Result<bool, RaftError> {
        let me = self.me().await?;
        if me.role != NodeRole::Candidate {
            return Ok(false);
        }

        // Nobody else to ask: the node's own vote decides.
        if self.peers.is_empty() {
            return self.record_vote(me.term).await;
        }

        for peer in &self.peers {
            debug!("Candidate {} requesting vote from {}", me.name, peer.name);
            let request = CommandMsg::vote_request(me.clone());
            let response = match self
                .transport
                .call(&peer.name, RpcMethod::VoteRequest, request)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("Vote request to {} failed: {e}", peer.name);
                    self.transport.report_failure(peer).await;
                    continue;
                }
            };

            debug!(
                "{} answered {}: granted={}",
                peer.name, me.name, response.vote_granted
            );
            if response.vote_granted && self.record_vote(me.term).await? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn record_vote(&self, term: u64) -> Result<bool, RaftError> {
        self.submit(|reply| Event::VoteGranted { term, reply }).await
    }

    /// Broadcast a heartbeat while Leader. Returns how many peers answered.
    pub async fn send_heartbeat(&self) -> Result<usize, RaftError> {
        let me = self.me().await?;
        if !me.is_leader() {
            return Ok(0);
        }

        let mut delivered = 0;
        for peer in &self.peers {
            let request = CommandMsg::heartbeat(me.clone());
            match self
                .transport
                .call(&peer.name, RpcMethod::Heartbeat, request)
                .await
            {
                Ok(_) => {
                    delivered += 1;
                    debug!("Leader {} sent heartbeat to {}", me.name, peer.name);
                }
                Err(e) => {
                    debug!("Heartbeat to {} failed: {e}", peer.name);
                    self.transport.report_failure(peer).await;
                }
            }
        }
        Ok(delivered)
    }

    /// Replicate a client write to every peer, then apply it locally.
    ///
    /// Peers are contacted one at a time and the first failure aborts the
    /// write. Peers that already accepted the entry keep it: there is no
    /// rollback, and the entry is not applied locally.
    pub async fn propose(&self, entry: LogEntry) -> Result<String, RaftError> {
        if self.is_shutting_down() {
            return Err(RaftError::ShuttingDown);
        }

        let me = self.me().await?;
        if !me.is_leader() {
            return Err(RaftError::NotLeader {
                leader: me.leader().map(str::to_string),
            });
        }

        for peer in &self.peers {
            let request = CommandMsg::replicate(me.clone(), entry.clone());
            match self
                .transport
                .call(&peer.name, RpcMethod::ReplicateEntry, request)
                .await
            {
                Ok(response) => {
                    if let Some(reason) = response.error {
                        warn!("Peer {} rejected entry {}: {reason}", peer.name, entry.key);
                        return Err(RaftError::ReplicationPartialFailure {
                            peer: peer.name.clone(),
                            reason,
                        });
                    }
                }
                Err(e) => {
                    warn!("Replicating entry {} to {} failed: {e}", entry.key, peer.name);
                    self.transport.report_failure(peer).await;
                    return Err(RaftError::ReplicationPartialFailure {
                        peer: peer.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let store = Arc::clone(&self.store);
        let key = entry.key.clone();
        let ack = tokio::task::spawn_blocking(move || store.resolve(&entry)).await??;
        debug!("Leader {} applied entry {key}", self.name);
        Ok(ack)
    }

    // --- RPC Handlers ---

    pub async fn handle_heartbeat(&self, request: CommandMsg) -> Result<CommandMsg, RaftError> {
        debug!("{} received heartbeat from {}", self.name, request.sender().name);
        self.submit(|reply| Event::Heartbeat { request, reply }).await
    }

    pub async fn handle_vote_request(&self, request: CommandMsg) -> Result<CommandMsg, RaftError> {
        self.submit(|reply| Event::VoteRequest { request, reply })
            .await
    }

    /// Apply an entry sent by the leader. Store failures travel back in the
    /// envelope; they never change role or term.
    pub fn handle_replicate(&self, request: CommandMsg) -> CommandMsg {
        let mut response = CommandMsg::new(CommandKind::ReplicateEntry, None);
        let sender = request.sender().name;

        let Some(entry) = request.entry else {
            response.error = Some("missing log entry".to_string());
            return response;
        };

        match self.store.resolve(&entry) {
            Ok(value) => {
                debug!("{} received log entry {} from {sender}", self.name, entry.key);
                response.msg = value;
            }
            Err(e) => {
                warn!("{} could not apply entry from {sender}: {e}", self.name);
                response.error = Some(e.to_string());
            }
        }
        response
    }

    #[cfg(test)]
    async fn fire_election_timeout(&self) {
        let _ = self.events.send(Event::ElectionTimeout).await;
    }
}
