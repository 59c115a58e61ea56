use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{StorageBackend, StorageError};

/// In-process storage backend with the same semantics as [`RedisStorage`].
/// Used by the test suite and handy for local development without Redis.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    logs: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), StorageError> {
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push_front(payload.to_string());
        Ok(())
    }

    async fn queue_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StorageError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(payload) = self
                .queues
                .lock()
                .unwrap()
                .get_mut(queue)
                .and_then(|q| q.pop_back())
            {
                return Ok(Some(payload));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, StorageError> {
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, |q| q.len() as u64))
    }

    async fn log_append(&self, log: &str, entry: &str) -> Result<(), StorageError> {
        self.logs
            .lock()
            .unwrap()
            .entry(log.to_string())
            .or_default()
            .push(entry.to_string());
        Ok(())
    }

    async fn log_tail(&self, log: &str, limit: usize) -> Result<Vec<String>, StorageError> {
        Ok(self.logs.lock().unwrap().get(log).map_or_else(Vec::new, |entries| {
            entries.iter().rev().take(limit).cloned().collect()
        }))
    }
}
