pub mod config;
pub mod network;
pub mod raft;
pub mod shutdown;
pub mod storage;

// Public exports
pub use config::{Config, PeerConfig};
pub use raft::{Raft, RaftConfig, RaftError};
pub use storage::{FileStore, Store};
