//! Credential pool with per-key cooldown and permanent eviction
//!
//! Hands out API keys no more often than once per cooldown interval, oldest
//! use first, and permanently removes keys that prove broken. All scheduling
//! state lives behind one mutex; the cooldown sleep happens after the lock is
//! released so a worker waiting on one key never blocks selection of another.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no active credentials remain")]
    Exhausted,
}

/// A committed credential handout.
///
/// The commitment window starts at the instant stamped under the pool lock;
/// `acquire` does not return until that instant has passed.
#[derive(Debug, Clone)]
pub struct Lease {
    pub token: String,
    slot: usize,
}

impl Lease {
    /// Last 5 characters of the token, for logs. Tokens are opaque and may
    /// contain multibyte characters, so this counts chars, not bytes.
    pub fn suffix(&self) -> &str {
        match self.token.char_indices().rev().nth(4) {
            Some((i, _)) => &self.token[i..],
            None => &self.token,
        }
    }
}

struct Slot {
    token: String,
    /// Instant of the most recent commitment (the *ready* instant, not the
    /// call instant), `None` if never handed out.
    last_used: Option<Instant>,
    active: bool,
    /// Consecutive all-variants-missing strikes. Reset on any clean call.
    strikes: u32,
}

struct PoolInner {
    slots: Vec<Slot>,
    active: usize,
}

/// Rate-limited pool over a fixed set of interchangeable credentials.
pub struct CredentialPool {
    cooldown: Duration,
    evict_after_strikes: u32,
    inner: Mutex<PoolInner>,
}

impl CredentialPool {
    pub fn new(tokens: Vec<String>, cooldown: Duration, evict_after_strikes: u32) -> Self {
        let slots: Vec<Slot> = tokens
            .into_iter()
            .map(|token| Slot {
                token,
                last_used: None,
                active: true,
                strikes: 0,
            })
            .collect();
        let active = slots.len();
        debug!(credentials = active, ?cooldown, "CredentialPool::new");
        Self {
            cooldown,
            evict_after_strikes: evict_after_strikes.max(1),
            inner: Mutex::new(PoolInner { slots, active }),
        }
    }

    /// Acquire the least-recently-used active credential, honoring its
    /// cooldown.
    ///
    /// Selection, the commitment stamp, and the computation of how long to
    /// wait all happen under the lock; the wait itself happens after release.
    /// Because `last_used` is stamped to the ready instant, a second caller
    /// selecting the same slot is pushed one full cooldown further out, so
    /// no two handouts of one key ever have commitment windows closer than
    /// the cooldown.
    pub async fn acquire(&self) -> Result<Lease, PoolError> {
        let (lease, wait) = {
            let mut inner = self.inner.lock().await;

            if inner.active == 0 {
                warn!("acquire: pool exhausted");
                return Err(PoolError::Exhausted);
            }

            let now = Instant::now();

            // Oldest last_used wins; never-used slots first; ties broken by
            // insertion order via min_by_key stability.
            let slot_idx = inner
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.active)
                .min_by_key(|(_, s)| s.last_used)
                .map(|(i, _)| i)
                .ok_or(PoolError::Exhausted)?;

            let slot = &mut inner.slots[slot_idx];
            let ready_at = match slot.last_used {
                Some(last) if last + self.cooldown > now => last + self.cooldown,
                _ => now,
            };
            slot.last_used = Some(ready_at);

            let lease = Lease {
                token: slot.token.clone(),
                slot: slot_idx,
            };
            (lease, ready_at.saturating_duration_since(now))
        };

        if !wait.is_zero() {
            debug!(key = %lease.suffix(), wait_ms = wait.as_millis() as u64, "acquire: cooling down");
            tokio::time::sleep(wait).await;
        }
        Ok(lease)
    }

    /// Permanently remove a credential from rotation.
    pub async fn evict(&self, lease: &Lease) {
        let mut inner = self.inner.lock().await;
        let slot = &mut inner.slots[lease.slot];
        if slot.active {
            slot.active = false;
            inner.active -= 1;
            warn!(key = %lease.suffix(), remaining = inner.active, "credential evicted");
            if inner.active == 0 {
                warn!("last credential evicted, pool exhausted");
            }
        }
    }

    /// Record an all-variants-missing strike against a credential; evicts it
    /// once strikes reach the configured threshold. Returns true if the
    /// credential was evicted by this call.
    pub async fn record_strike(&self, lease: &Lease) -> bool {
        let evict_now = {
            let mut inner = self.inner.lock().await;
            let slot = &mut inner.slots[lease.slot];
            if !slot.active {
                return false;
            }
            slot.strikes += 1;
            debug!(key = %lease.suffix(), strikes = slot.strikes, "strike recorded");
            slot.strikes >= self.evict_after_strikes
        };
        if evict_now {
            self.evict(lease).await;
        }
        evict_now
    }

    /// Reset a credential's strike counter after a clean call.
    pub async fn clear_strikes(&self, lease: &Lease) {
        let mut inner = self.inner.lock().await;
        inner.slots[lease.slot].strikes = 0;
    }

    /// Number of credentials still in rotation.
    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active
    }
}
