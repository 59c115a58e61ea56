pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::MemoryStorage;
pub use self::redis::RedisStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] ::redis::RedisError),
    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable byte-level operations the core needs: string documents, FIFO
/// queues and append-only logs. Production runs on Redis; tests run on the
/// in-process implementation.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Enqueue a payload. Payloads pushed here are the last to be popped, so
    /// re-enqueueing a failed payload sends it to the back of the line.
    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), StorageError>;
    /// Blocking pop from the consumption end, returning `None` on timeout so
    /// the caller can run liveness checks.
    async fn queue_pop(&self, queue: &str, timeout: Duration)
        -> Result<Option<String>, StorageError>;
    async fn queue_len(&self, queue: &str) -> Result<u64, StorageError>;

    /// Append an entry to an append-only log.
    async fn log_append(&self, log: &str, entry: &str) -> Result<(), StorageError>;
    /// Read up to `limit` most recent log entries, newest first.
    async fn log_tail(&self, log: &str, limit: usize) -> Result<Vec<String>, StorageError>;
}
