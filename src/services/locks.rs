use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Key of one lockable seat: `(evento_id, seat_id)`.
type LockKey = (String, String);

#[derive(Debug, Clone)]
struct LockInfo {
    session_id: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockResult {
    /// Lock granted to the caller.
    Success { owner: String },
    /// Caller already held the lock; its TTL was refreshed.
    AlreadyLockedByMe { owner: String },
    /// An unexpired lock is held by another session.
    LockedByOther { owner: String },
    Sold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockPurchaseResult {
    Success,
    Sold,
    LockedByOther { owner: String },
}

/// In-memory, TTL-bounded exclusive lock per (event, seat), plus the set of
/// seats this process has sold. Local-process only: there is no distributed
/// coordination, and the table is not rebuilt after a restart.
///
/// Every mutating operation runs inside one critical section. Reads treat an
/// expired lock as absent, so correctness does not depend on the sweep.
pub struct SeatLockManager {
    ttl: Duration,
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    locks: HashMap<LockKey, LockInfo>,
    sold: HashSet<LockKey>,
}

impl SeatLockManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Tables::default()),
        }
    }

    fn key(evento_id: &str, seat_id: &str) -> LockKey {
        (evento_id.to_string(), seat_id.to_string())
    }

    /// Try to take (or refresh) the exclusive lock for `session_id`.
    pub fn try_block(&self, evento_id: &str, seat_id: &str, session_id: &str) -> BlockResult {
        let key = Self::key(evento_id, seat_id);
        let now = Instant::now();
        let mut tables = self.inner.lock().unwrap();

        if tables.sold.contains(&key) {
            return BlockResult::Sold;
        }

        match tables.locks.get_mut(&key) {
            Some(cur) if cur.expires_at > now => {
                if cur.session_id == session_id {
                    cur.expires_at = now + self.ttl;
                    BlockResult::AlreadyLockedByMe {
                        owner: session_id.to_string(),
                    }
                } else {
                    BlockResult::LockedByOther {
                        owner: cur.session_id.clone(),
                    }
                }
            }
            _ => {
                tables.locks.insert(
                    key,
                    LockInfo {
                        session_id: session_id.to_string(),
                        expires_at: now + self.ttl,
                    },
                );
                BlockResult::Success {
                    owner: session_id.to_string(),
                }
            }
        }
    }

    /// Release the lock only if `session_id` owns it.
    pub fn unlock_if_owner(&self, evento_id: &str, seat_id: &str, session_id: &str) -> bool {
        let key = Self::key(evento_id, seat_id);
        let mut tables = self.inner.lock().unwrap();
        match tables.locks.get(&key) {
            Some(cur) if cur.session_id == session_id => {
                tables.locks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Mark the seat sold. Succeeds when no active lock exists (implicit
    /// direct sale) or when the caller owns the lock; the lock is dropped.
    pub fn purchase(&self, evento_id: &str, seat_id: &str, session_id: &str) -> LockPurchaseResult {
        let key = Self::key(evento_id, seat_id);
        let now = Instant::now();
        let mut tables = self.inner.lock().unwrap();

        if tables.sold.contains(&key) {
            return LockPurchaseResult::Sold;
        }

        match tables.locks.get(&key) {
            Some(cur) if cur.expires_at > now && cur.session_id != session_id => {
                LockPurchaseResult::LockedByOther {
                    owner: cur.session_id.clone(),
                }
            }
            _ => {
                tables.locks.remove(&key);
                tables.sold.insert(key);
                LockPurchaseResult::Success
            }
        }
    }

    /// Owner of the current lock, treating an expired lock as absent and
    /// removing it (lazy expiry).
    pub fn get_lock_owner(&self, evento_id: &str, seat_id: &str) -> Option<String> {
        let key = Self::key(evento_id, seat_id);
        let now = Instant::now();
        let mut tables = self.inner.lock().unwrap();
        match tables.locks.get(&key) {
            Some(cur) if cur.expires_at > now => Some(cur.session_id.clone()),
            Some(_) => {
                tables.locks.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn is_sold(&self, evento_id: &str, seat_id: &str) -> bool {
        let key = Self::key(evento_id, seat_id);
        self.inner.lock().unwrap().sold.contains(&key)
    }

    /// Drop every expired lock. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut tables = self.inner.lock().unwrap();
        let before = tables.locks.len();
        tables.locks.retain(|_, info| info.expires_at > now);
        before - tables.locks.len()
    }

    /// Periodic sweep bounding memory growth. The returned handle must be
    /// aborted on shutdown.
    pub fn start_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let removed = manager.sweep_expired();
                if removed > 0 {
                    debug!("Lock sweep removed {} expired locks", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn grants_and_refreshes_lock() {
        let locks = SeatLockManager::new(TTL);
        assert_eq!(
            locks.try_block("1", "r2c5", "A"),
            BlockResult::Success { owner: "A".into() }
        );
        assert_eq!(
            locks.try_block("1", "r2c5", "A"),
            BlockResult::AlreadyLockedByMe { owner: "A".into() }
        );
        assert_eq!(
            locks.try_block("1", "r2c5", "B"),
            BlockResult::LockedByOther { owner: "A".into() }
        );
        // a different seat of the same event is independent
        assert_eq!(
            locks.try_block("1", "r2c6", "B"),
            BlockResult::Success { owner: "B".into() }
        );
    }

    #[tokio::test]
    async fn concurrent_blocks_grant_exactly_one() {
        let locks = Arc::new(SeatLockManager::new(TTL));
        let mut handles = Vec::new();
        for i in 0..16 {
            let locks = Arc::clone(&locks);
            handles.push(tokio::spawn(async move {
                locks.try_block("7", "r1c1", &format!("session-{i}"))
            }));
        }
        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                BlockResult::Success { .. } => successes += 1,
                BlockResult::LockedByOther { .. } => {}
                other => panic!("unexpected result {other:?}"),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expires_after_ttl() {
        let locks = SeatLockManager::new(TTL);
        assert!(matches!(
            locks.try_block("1", "r2c5", "A"),
            BlockResult::Success { .. }
        ));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(locks.get_lock_owner("1", "r2c5").as_deref(), Some("A"));
        assert!(matches!(
            locks.try_block("1", "r2c5", "B"),
            BlockResult::LockedByOther { .. }
        ));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(locks.get_lock_owner("1", "r2c5"), None);
        assert!(matches!(
            locks.try_block("1", "r2c5", "B"),
            BlockResult::Success { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_ttl() {
        let locks = SeatLockManager::new(TTL);
        locks.try_block("1", "r1c1", "A");
        tokio::time::advance(Duration::from_secs(200)).await;
        locks.try_block("1", "r1c1", "A"); // refresh
        tokio::time::advance(Duration::from_secs(200)).await;
        // 400s after the first block, but only 200s after the refresh
        assert_eq!(locks.get_lock_owner("1", "r1c1").as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn unlock_only_for_owner() {
        let locks = SeatLockManager::new(TTL);
        locks.try_block("1", "r2c5", "A");
        assert!(!locks.unlock_if_owner("1", "r2c5", "B"));
        assert_eq!(locks.get_lock_owner("1", "r2c5").as_deref(), Some("A"));
        assert!(locks.unlock_if_owner("1", "r2c5", "A"));
        assert_eq!(locks.get_lock_owner("1", "r2c5"), None);
        assert!(!locks.unlock_if_owner("1", "r2c5", "A"));
    }

    #[tokio::test]
    async fn purchase_semantics() {
        let locks = SeatLockManager::new(TTL);

        // implicit direct sale with no lock
        assert_eq!(locks.purchase("1", "r1c1", "A"), LockPurchaseResult::Success);
        assert!(locks.is_sold("1", "r1c1"));
        assert_eq!(locks.purchase("1", "r1c1", "A"), LockPurchaseResult::Sold);
        assert_eq!(locks.try_block("1", "r1c1", "B"), BlockResult::Sold);

        // locked seat only sellable by the owner
        locks.try_block("1", "r2c2", "A");
        assert_eq!(
            locks.purchase("1", "r2c2", "B"),
            LockPurchaseResult::LockedByOther { owner: "A".into() }
        );
        assert_eq!(locks.purchase("1", "r2c2", "A"), LockPurchaseResult::Success);
        assert_eq!(locks.get_lock_owner("1", "r2c2"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired() {
        let locks = SeatLockManager::new(TTL);
        locks.try_block("1", "r1c1", "A");
        tokio::time::advance(Duration::from_secs(200)).await;
        locks.try_block("1", "r1c2", "B");
        tokio::time::advance(Duration::from_secs(150)).await;

        // r1c1 is 350s old (expired), r1c2 is 150s old (live)
        assert_eq!(locks.sweep_expired(), 1);
        assert_eq!(locks.get_lock_owner("1", "r1c2").as_deref(), Some("B"));
    }
}
