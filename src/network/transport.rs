use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{sleep, timeout};

use crate::raft::{CommandMsg, Node};

use super::NetworkError;

/// The remote procedures a node exposes to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Heartbeat,
    VoteRequest,
    ReplicateEntry,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::Heartbeat => "Raft.Heartbeat",
            RpcMethod::VoteRequest => "Raft.VoteRequest",
            RpcMethod::ReplicateEntry => "Raft.ReplicateEntry",
        }
    }
}

/// A live connection to one peer.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn call(&self, method: RpcMethod, request: CommandMsg)
        -> Result<CommandMsg, NetworkError>;
}

/// Opens connections to peers.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, node: &Node) -> Result<Arc<dyn PeerClient>, NetworkError>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub retry_backoff: Duration,
    pub call_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(1),
            queue_capacity: 10,
        }
    }
}

struct Inner {
    pool: RwLock<HashMap<String, Arc<dyn PeerClient>>>,
    // Names currently sitting in the failure queue.
    queued: Mutex<HashSet<String>>,
    failed_tx: mpsc::Sender<Node>,
    dialer: Arc<dyn Dialer>,
    config: TransportConfig,
}

/// Pool of peer connections keyed by node name, with a background loop that
/// keeps redialing peers whose connections failed.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Must be called inside a tokio runtime: spawns the reconnect loop.
    pub fn new(dialer: Arc<dyn Dialer>, config: TransportConfig) -> Self {
        let (failed_tx, failed_rx) = mpsc::channel(config.queue_capacity.max(1));
        let inner = Arc::new(Inner {
            pool: RwLock::new(HashMap::new()),
            queued: Mutex::new(HashSet::new()),
            failed_tx,
            dialer,
            config,
        });

        tokio::spawn(retry_failed_nodes(Arc::clone(&inner), failed_rx));

        Self { inner }
    }

    /// Dial `node` and pool the connection, or queue the node for a retry.
    pub async fn connect(&self, node: &Node) {
        self.inner.connect(node).await;
    }

    pub async fn disconnect(&self, name: &str) {
        self.inner.pool.write().await.remove(name);
    }

    pub async fn call(
        &self,
        name: &str,
        method: RpcMethod,
        request: CommandMsg,
    ) -> Result<CommandMsg, NetworkError> {
        let client = {
            let pool = self.inner.pool.read().await;
            pool.get(name).cloned()
        }
        .ok_or_else(|| NetworkError::NotConnected(name.to_string()))?;

        debug!("Calling {} on {name}", method.as_str());
        match timeout(self.inner.config.call_timeout, client.call(method, request)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::TimeoutError),
        }
    }

    /// Drop the connection to `node` and queue it for reconnection.
    pub async fn report_failure(&self, node: &Node) {
        self.disconnect(&node.name).await;
        self.inner.enqueue(node.clone()).await;
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.inner.pool.read().await.contains_key(name)
    }

    pub async fn connected_peers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.pool.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Inner {
    async fn connect(&self, node: &Node) {
        match self.dialer.dial(node).await {
            Ok(client) => {
                self.pool.write().await.insert(node.name.clone(), client);
                info!("Connected to {} at {}", node.name, node.address);
            }
            Err(e) => {
                debug!("Failed to connect to {} at {}: {e}", node.name, node.address);
                self.enqueue(node.clone()).await;
            }
        }
    }

    // Never blocks: a node already waiting in the queue is not queued twice,
    // and a full queue drops the request.
    async fn enqueue(&self, node: Node) {
        let mut queued = self.queued.lock().await;
        if !queued.insert(node.name.clone()) {
            return;
        }

        let name = node.name.clone();
        if let Err(e) = self.failed_tx.try_send(node) {
            queued.remove(&name);
            warn!("Reconnect queue rejected {name}: {e}");
        }
    }
}

async fn retry_failed_nodes(inner: Arc<Inner>, mut failed_rx: mpsc::Receiver<Node>) {
    while let Some(node) = failed_rx.recv().await {
        sleep(inner.config.retry_backoff).await;
        inner.queued.lock().await.remove(&node.name);

        info!("Trying to reconnect to {}", node.name);
        inner.connect(&node).await;
    }
}
