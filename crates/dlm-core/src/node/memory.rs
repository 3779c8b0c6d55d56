// In-process storage node
// Keeps leases in a DashMap with per-entry expiry, so each primitive is a
// single atomic map operation on the key's shard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use dlm_common::KEY_PREFIX;

use super::Node;

/// A lease held on one key
struct LeaseEntry {
    token: String,
    acquired_at: Instant,
    ttl: Duration,
}

impl LeaseEntry {
    fn new(token: &str, ttl_ms: u64) -> Self {
        Self {
            token: token.to_string(),
            acquired_at: Instant::now(),
            ttl: Duration::from_millis(ttl_ms),
        }
    }

    fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// Storage node living in the current process
///
/// Useful for single-process deployments and tests. A node can be marked
/// unreachable to simulate an outage: connecting fails and every primitive
/// behaves like a failed network call.
pub struct MemoryNode {
    endpoint: String,
    key_prefix: String,
    leases: DashMap<String, LeaseEntry>,
    connected: AtomicBool,
    reachable: AtomicBool,
}

impl MemoryNode {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_prefix(endpoint, KEY_PREFIX)
    }

    pub fn with_prefix(endpoint: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key_prefix: key_prefix.into(),
            leases: DashMap::new(),
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        }
    }

    fn key(&self, resource: &str) -> String {
        format!("{}{}", self.key_prefix, resource)
    }

    fn available(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.reachable.load(Ordering::Acquire)
    }

    /// Simulate the node going down or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Token currently holding `resource`, if the lease has not expired
    pub fn holder(&self, resource: &str) -> Option<String> {
        self.leases
            .get(&self.key(resource))
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.token.clone())
    }

    /// Remaining lifetime of the lease on `resource`
    pub fn remaining_ttl(&self, resource: &str) -> Option<Duration> {
        self.leases.get(&self.key(resource)).and_then(|entry| {
            entry
                .ttl
                .checked_sub(entry.acquired_at.elapsed())
                .filter(|d| !d.is_zero())
        })
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.leases.len();
        self.leases.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.leases.len());
        if removed > 0 {
            debug!(
                endpoint = %self.endpoint,
                count = removed,
                "Purged expired lease entries"
            );
        }
        removed
    }

    /// Periodically purge expired entries in the background
    pub fn start_expiry_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.purge_expired();
            }
        })
    }
}

#[async_trait]
impl Node for MemoryNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> bool {
        if !self.reachable.load(Ordering::Acquire) {
            debug!(endpoint = %self.endpoint, "Memory node unreachable");
            return false;
        }
        self.connected.store(true, Ordering::Release);
        true
    }

    async fn try_acquire(&self, resource: &str, token: &str, ttl_ms: u64) -> bool {
        if !self.available() {
            return false;
        }

        match self.leases.entry(self.key(resource)) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired() {
                    return false;
                }
                occupied.insert(LeaseEntry::new(token, ttl_ms));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry::new(token, ttl_ms));
            }
        }

        debug!(endpoint = %self.endpoint, resource = %resource, "Lease acquired");
        true
    }

    async fn release(&self, resource: &str, token: &str) {
        if !self.available() {
            return;
        }

        if self
            .leases
            .remove_if(&self.key(resource), |_, entry| entry.token == token)
            .is_some()
        {
            debug!(endpoint = %self.endpoint, resource = %resource, "Lease released");
        }
    }

    async fn try_renew(&self, resource: &str, token: &str, ttl_ms: u64) -> bool {
        if !self.available() {
            return false;
        }

        match self.leases.get_mut(&self.key(resource)) {
            Some(mut entry) if entry.token == token && !entry.is_expired() => {
                entry.acquired_at = Instant::now();
                entry.ttl = Duration::from_millis(ttl_ms);
                true
            }
            _ => false,
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Release);
    }
}
