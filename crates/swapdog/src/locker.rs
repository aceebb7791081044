//! Per-offer purchase locks.
//!
//! Expiry is checked when a lock is touched, there is no sweeper task. Locks are
//! advisory over the off-chain workflow only, a racing spend of the same asset
//! is still stopped by the network at broadcast.

use super::*;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone)]
struct PurchaseLock {
    holder: String,
    acquired_at: Instant,
    ttl: Duration,
    /// Live guards, the last one to drop releases the lock.
    guards: usize,
}

impl PurchaseLock {
    fn expires_at(&self) -> Instant {
        self.acquired_at + self.ttl
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    Granted,
    Renewed,
}

#[derive(Debug, Default)]
pub struct PurchaseLocks {
    locks: Mutex<HashMap<String, PurchaseLock>>,
}

impl PurchaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self, offer_id: &str, holder: &str, ttl: Duration) -> Result<LockGrant, SwapError> {
        self.lock_at(offer_id, holder, ttl, Instant::now(), false)
    }

    fn try_lock_at(
        &self,
        offer_id: &str,
        holder: &str,
        ttl: Duration,
        now: Instant,
    ) -> Result<LockGrant, SwapError> {
        self.lock_at(offer_id, holder, ttl, now, false)
    }

    fn lock_at(
        &self,
        offer_id: &str,
        holder: &str,
        ttl: Duration,
        now: Instant,
        guarded: bool,
    ) -> Result<LockGrant, SwapError> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        let grant = match locks.get(offer_id) {
            Some(lock) if !lock.is_expired(now) && lock.holder != holder => {
                return Err(SwapError::LockDenied {
                    holder: lock.holder.clone(),
                    expires_in: lock.expires_at().saturating_duration_since(now),
                });
            }
            Some(lock) if !lock.is_expired(now) => LockGrant::Renewed,
            Some(lock) => {
                debug!("lock on {} held by {} expired", offer_id, lock.holder);
                LockGrant::Granted
            }
            None => LockGrant::Granted,
        };
        let inherited = match grant {
            LockGrant::Renewed => locks.get(offer_id).map(|lock| lock.guards).unwrap_or(0),
            LockGrant::Granted => 0,
        };

        locks.insert(
            offer_id.to_string(),
            PurchaseLock {
                holder: holder.to_string(),
                acquired_at: now,
                ttl,
                guards: inherited + usize::from(guarded),
            },
        );
        debug!("lock on {} {:?} to {}", offer_id, grant, holder);
        Ok(grant)
    }

    /// Releases the lock if `holder` owns it, otherwise does nothing.
    pub fn unlock(&self, offer_id: &str, holder: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        match locks.get(offer_id) {
            Some(lock) if lock.holder == holder => {
                locks.remove(offer_id);
                debug!("lock on {} released by {}", offer_id, holder);
            }
            Some(lock) => {
                debug!(
                    "unlock of {} by {} ignored, held by {}",
                    offer_id, holder, lock.holder
                );
            }
            None => {}
        }
    }

    fn drop_guard(&self, offer_id: &str, holder: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let release = match locks.get_mut(offer_id) {
            Some(lock) if lock.holder == holder => {
                lock.guards = lock.guards.saturating_sub(1);
                lock.guards == 0
            }
            _ => false,
        };
        if release {
            locks.remove(offer_id);
            debug!("lock on {} released by {}", offer_id, holder);
        }
    }

    /// Current non-expired holder.
    pub fn holder(&self, offer_id: &str) -> Option<String> {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(offer_id)
            .filter(|lock| !lock.is_expired(Instant::now()))
            .map(|lock| lock.holder.clone())
    }

    /// Locks and returns a guard that unlocks when dropped.
    pub fn acquire(
        self: &Arc<Self>,
        offer_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<(LockGuard, LockGrant), SwapError> {
        let grant = self.lock_at(offer_id, holder, ttl, Instant::now(), true)?;
        let guard = LockGuard {
            locks: Arc::clone(self),
            offer_id: offer_id.to_string(),
            holder: holder.to_string(),
        };
        Ok((guard, grant))
    }
}

/// Releases its lock on every exit path, including early returns and panics,
/// once no other guard of the same holder is alive.
pub struct LockGuard {
    locks: Arc<PurchaseLocks>,
    offer_id: String,
    holder: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locks.drop_guard(&self.offer_id, &self.holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn second_holder_is_denied_with_first_holder_named() {
        let locks = PurchaseLocks::new();
        assert_eq!(locks.try_lock("o1", "alice", TTL).unwrap(), LockGrant::Granted);
        match locks.try_lock("o1", "bob", TTL) {
            Err(SwapError::LockDenied { holder, expires_in }) => {
                assert_eq!(holder, "alice");
                assert!(expires_in <= TTL);
            }
            other => panic!("unexpected {other:?}"),
        }
        // other offers are unaffected
        assert_eq!(locks.try_lock("o2", "bob", TTL).unwrap(), LockGrant::Granted);
    }

    #[test]
    fn concurrent_attempts_grant_exactly_one() {
        let locks = Arc::new(PurchaseLocks::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = Arc::clone(&locks);
                thread::spawn(move || locks.try_lock("o1", &format!("buyer-{i}"), TTL).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 1);
    }

    #[test]
    fn same_holder_renews() {
        let locks = PurchaseLocks::new();
        locks.try_lock("o1", "alice", TTL).unwrap();
        assert_eq!(locks.try_lock("o1", "alice", TTL).unwrap(), LockGrant::Renewed);
    }

    #[test]
    fn expired_lock_is_taken_over() {
        let locks = PurchaseLocks::new();
        let start = Instant::now();
        locks
            .try_lock_at("o1", "alice", Duration::from_secs(5), start)
            .unwrap();
        assert!(locks
            .try_lock_at("o1", "bob", TTL, start + Duration::from_secs(4))
            .is_err());
        let grant = locks
            .try_lock_at("o1", "bob", TTL, start + Duration::from_secs(5))
            .unwrap();
        assert_eq!(grant, LockGrant::Granted);
        assert_eq!(locks.holder("o1").as_deref(), Some("bob"));
    }

    #[test]
    fn unlock_ignores_other_holders_and_is_idempotent() {
        let locks = PurchaseLocks::new();
        locks.try_lock("o1", "alice", TTL).unwrap();

        locks.unlock("o1", "mallory");
        assert_eq!(locks.holder("o1").as_deref(), Some("alice"));

        locks.unlock("o1", "alice");
        locks.unlock("o1", "alice");
        assert_eq!(locks.holder("o1"), None);
        assert_eq!(locks.try_lock("o1", "bob", TTL).unwrap(), LockGrant::Granted);
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = Arc::new(PurchaseLocks::new());
        {
            let (_guard, grant) = locks.acquire("o1", "alice", TTL).unwrap();
            assert_eq!(grant, LockGrant::Granted);
            assert!(locks.try_lock("o1", "bob", TTL).is_err());
        }
        assert_eq!(locks.holder("o1"), None);
    }

    #[test]
    fn overlapping_guards_of_one_holder_keep_the_lock() {
        let locks = Arc::new(PurchaseLocks::new());
        let (first, _) = locks.acquire("o1", "alice", TTL).unwrap();
        let (second, grant) = locks.acquire("o1", "alice", TTL).unwrap();
        assert_eq!(grant, LockGrant::Renewed);

        drop(first);
        assert_eq!(locks.holder("o1").as_deref(), Some("alice"));
        assert!(locks.try_lock("o1", "bob", TTL).is_err());

        drop(second);
        assert_eq!(locks.holder("o1"), None);
    }
}
