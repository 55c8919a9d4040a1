use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Type-erased cached value. Callers downcast back to the type they stored.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

/// What an in-flight computation publishes to the callers waiting on it.
pub type Outcome = std::result::Result<SharedValue, String>;

pub enum CacheEntry {
    /// A computation for this key is running; waiters subscribe to its outcome.
    Pending {
        claim_id: u64,
        outcome: watch::Receiver<Option<Outcome>>,
    },
    Resolved {
        claim_id: u64,
        value: SharedValue,
        /// `None` means the entry is never evicted.
        expires_at: Option<Instant>,
    },
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self {
            CacheEntry::Resolved { expires_at: Some(at), .. } => now >= *at,
            _ => false,
        }
    }
}

pub enum Lookup {
    Hit(SharedValue),
    Wait(watch::Receiver<Option<Outcome>>),
    Claimed(PendingClaim),
}

/// Keyed response cache. Clones share the same map.
#[derive(Clone, Default)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    next_claim: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a live value, the pending computation to wait on, or a claim
    /// making the caller responsible for computing the key. The check and the
    /// pending marker insert happen under the same shard lock.
    pub fn lookup_or_claim(&self, key: &str) -> Lookup {
        let now = Instant::now();
        let mut entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => occupied,
            Entry::Vacant(vacant) => {
                let (claim, pending) = self.new_claim(key);
                vacant.insert(pending);
                return Lookup::Claimed(claim);
            }
        };

        let existing = match entry.get() {
            CacheEntry::Pending { outcome, .. } => Some(Lookup::Wait(outcome.clone())),
            resolved if resolved.is_expired(now) => None,
            CacheEntry::Resolved { value, .. } => Some(Lookup::Hit(value.clone())),
        };
        if let Some(lookup) = existing {
            return lookup;
        }

        let (claim, pending) = self.new_claim(key);
        entry.insert(pending);
        Lookup::Claimed(claim)
    }

    fn new_claim(&self, key: &str) -> (PendingClaim, CacheEntry) {
        let claim_id = self.next_claim.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let claim = PendingClaim {
            cache: self.clone(),
            key: key.to_string(),
            claim_id,
            tx,
            settled: false,
        };
        (claim, CacheEntry::Pending { claim_id, outcome: rx })
    }

    /// Live value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<SharedValue> {
        let entry = self.entries.get(key)?;
        match entry.value() {
            resolved if resolved.is_expired(Instant::now()) => None,
            CacheEntry::Resolved { value, .. } => Some(value.clone()),
            CacheEntry::Pending { .. } => None,
        }
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop expired entries. Reads already ignore them; this only reclaims memory.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove `key` once `ttl` has passed, unless it was replaced meanwhile.
    /// Outside a runtime expiry is left to reads and [`ResponseCache::cleanup`].
    fn schedule_eviction(&self, key: &str, claim_id: u64, ttl: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let entries: Weak<DashMap<String, CacheEntry>> = Arc::downgrade(&self.entries);
        let key = key.to_string();

        handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(entries) = entries.upgrade() {
                entries.remove_if(&key, |_, entry| {
                    matches!(entry, CacheEntry::Resolved { claim_id: id, .. } if *id == claim_id)
                });
            }
        });
    }

    fn settle(&self, key: &str, claim_id: u64, resolved: Option<CacheEntry>) {
        // Another caller may have invalidated and re-claimed the key meanwhile.
        if let Entry::Occupied(mut entry) = self.entries.entry(key.to_string()) {
            let owned = matches!(
                entry.get(),
                CacheEntry::Pending { claim_id: id, .. } if *id == claim_id
            );
            if !owned {
                return;
            }
            match resolved {
                Some(value) => {
                    entry.insert(value);
                }
                None => {
                    entry.remove();
                }
            }
        }
    }
}

/// Ownership of a key's in-flight computation. Dropping it unsettled removes
/// the pending marker and wakes waiters with a closed channel.
pub struct PendingClaim {
    cache: ResponseCache,
    key: String,
    claim_id: u64,
    tx: watch::Sender<Option<Outcome>>,
    settled: bool,
}

impl PendingClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store the value and schedule its eviction. A zero `ttl` keeps it until
    /// explicitly replaced.
    pub fn resolve(mut self, value: SharedValue, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.cache.settle(
            &self.key,
            self.claim_id,
            Some(CacheEntry::Resolved {
                claim_id: self.claim_id,
                value: value.clone(),
                expires_at,
            }),
        );
        if expires_at.is_some() {
            self.cache.schedule_eviction(&self.key, self.claim_id, ttl);
        }
        self.settled = true;
        let _ = self.tx.send(Some(Ok(value)));
    }

    pub fn fail(mut self, message: String) {
        self.cache.settle(&self.key, self.claim_id, None);
        self.settled = true;
        let _ = self.tx.send(Some(Err(message)));
    }
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.settle(&self.key, self.claim_id, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(cache: &ResponseCache, key: &str) -> PendingClaim {
        match cache.lookup_or_claim(key) {
            Lookup::Claimed(claim) => claim,
            _ => panic!("expected to claim {key}"),
        }
    }

    #[tokio::test]
    async fn test_second_lookup_waits_on_pending() {
        let cache = ResponseCache::new();
        let owner = claim(&cache, "k");

        let mut rx = match cache.lookup_or_claim("k") {
            Lookup::Wait(rx) => rx,
            _ => panic!("expected pending entry"),
        };

        owner.resolve(Arc::new(5u32), Duration::from_secs(1));
        let outcome = rx.wait_for(Option::is_some).await.unwrap().clone();
        let value = outcome.unwrap().unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&5));
        assert!(matches!(cache.lookup_or_claim("k"), Lookup::Hit(_)));
    }

    #[tokio::test]
    async fn test_dropped_claim_clears_pending() {
        let cache = ResponseCache::new();
        let owner = claim(&cache, "k");
        let mut rx = match cache.lookup_or_claim("k") {
            Lookup::Wait(rx) => rx,
            _ => panic!("expected pending entry"),
        };

        drop(owner);
        assert!(cache.is_empty());
        assert!(rx.wait_for(Option::is_some).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_claim_removes_entry() {
        let cache = ResponseCache::new();
        let owner = claim(&cache, "k");
        owner.fail("boom".into());
        assert!(cache.is_empty());
        assert!(matches!(cache.lookup_or_claim("k"), Lookup::Claimed(_)));
    }

    #[tokio::test]
    async fn test_stale_claim_does_not_overwrite_new_owner() {
        let cache = ResponseCache::new();
        let stale = claim(&cache, "k");
        cache.remove("k");
        let fresh = claim(&cache, "k");

        stale.resolve(Arc::new(1u32), Duration::ZERO);
        assert!(cache.get("k").is_none());

        fresh.resolve(Arc::new(2u32), Duration::ZERO);
        let value = cache.get("k").unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_only_expired() {
        let cache = ResponseCache::new();
        claim(&cache, "short").resolve(Arc::new(1u32), Duration::from_millis(100));
        claim(&cache, "forever").resolve(Arc::new(2u32), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(150)).await;
        cache.cleanup();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("forever").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_evicted_without_cleanup() {
        let cache = ResponseCache::new();
        claim(&cache, "k").resolve(Arc::new(1u32), Duration::from_millis(100));
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_spares_replacement_value() {
        let cache = ResponseCache::new();
        claim(&cache, "k").resolve(Arc::new(1u32), Duration::from_millis(100));
        cache.remove("k");
        claim(&cache, "k").resolve(Arc::new(2u32), Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(200)).await;

        let value = cache.get("k").unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&2));
    }
}
