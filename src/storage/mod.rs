mod error;
mod file_store;

pub use self::error::StorageError;
pub use self::file_store::FileStore;

use crate::raft::LogEntry;

/// Durable log plus applied key-value state, as consumed by the consensus
/// engine and the HTTP API.
pub trait Store: Send + Sync {
    /// Apply a write. Entries flagged `is_put_log` are appended to the log
    /// before they are applied. Returns the applied value.
    fn resolve(&self, entry: &LogEntry) -> Result<String, StorageError>;

    fn get(&self, key: &str) -> Result<String, StorageError>;

    /// Re-apply every logged entry found from byte `offset` onwards and
    /// return how many were applied.
    fn read_log_command(&self, offset: u64) -> Result<u64, StorageError>;
}
