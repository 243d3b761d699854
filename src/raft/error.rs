use thiserror::Error;

use crate::network::NetworkError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Not a leader (current leader: {})", .leader.as_deref().unwrap_or("unknown"))]
    NotLeader { leader: Option<String> },

    #[error("Replication to {peer} failed: {reason}")]
    ReplicationPartialFailure { peer: String, reason: String },

    #[error("Store rejected entry: {0}")]
    StoreApply(#[from] StorageError),

    #[error("Node is shutting down")]
    ShuttingDown,

    #[error("Node already started")]
    AlreadyStarted,

    #[error("Node is not running")]
    NotRunning,

    #[error("Store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}
