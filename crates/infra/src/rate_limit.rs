//! Per-API-key request quotas.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;

use aquaops_core::ApiKeyId;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rate limit of {per_minute} requests per minute exceeded")]
pub struct RateLimited {
    pub per_minute: u32,
}

/// Entries are pruned once the map holds this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// A bucket untouched for a full minute has refilled, so dropping it loses
/// nothing.
const IDLE_AFTER: Duration = Duration::from_secs(60);

struct Bucket {
    per_minute: u32,
    limiter: Arc<DefaultDirectRateLimiter>,
    last_seen: Instant,
}

/// One token bucket per key, rebuilt when the key's quota changes.
pub struct ApiKeyRateLimiter {
    buckets: Mutex<HashMap<ApiKeyId, Bucket>>,
    prune_threshold: usize,
    idle_after: Duration,
}

impl Default for ApiKeyRateLimiter {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            prune_threshold: PRUNE_THRESHOLD,
            idle_after: IDLE_AFTER,
        }
    }
}

impl ApiKeyRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: ApiKeyId, per_minute: u32) -> Result<(), RateLimited> {
        let now = Instant::now();
        let limiter = {
            let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
            if buckets.len() >= self.prune_threshold {
                buckets.retain(|_, b| now.duration_since(b.last_seen) < self.idle_after);
            }
            match buckets.get_mut(&key) {
                Some(bucket) if bucket.per_minute == per_minute => {
                    bucket.last_seen = now;
                    bucket.limiter.clone()
                }
                _ => {
                    let burst = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
                    let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(burst)));
                    buckets.insert(
                        key,
                        Bucket {
                            per_minute,
                            limiter: limiter.clone(),
                            last_seen: now,
                        },
                    );
                    limiter
                }
            }
        };

        limiter.check().map_err(|_| RateLimited { per_minute })
    }

    /// Drop a key's bucket (revoked keys never come back).
    pub fn forget(&self, key: ApiKeyId) {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }
}
