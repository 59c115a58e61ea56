use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};

use super::{StorageBackend, StorageError};

/// Redis-backed storage: documents as string keys, queues and logs as lists.
#[derive(Clone)]
pub struct RedisStorage {
    conn: MultiplexedConnection,
}

impl RedisStorage {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(RedisStorage { conn })
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, payload).await?;
        Ok(())
    }

    async fn queue_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        // BRPOP consumes from the right end; LPUSH enqueues at the left, so
        // the list behaves as a FIFO and a re-pushed payload goes to the tail.
        let popped: Option<(String, String)> = conn.brpop(queue, timeout.as_secs_f64()).await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, StorageError> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(queue).await?;
        Ok(len)
    }

    async fn log_append(&self, log: &str, entry: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(log, entry).await?;
        Ok(())
    }

    async fn log_tail(&self, log: &str, limit: usize) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn.clone();
        let start = -(limit as isize);
        let mut entries: Vec<String> = conn.lrange(log, start, -1).await?;
        entries.reverse();
        Ok(entries)
    }
}
