//! Quorum lock manager
//!
//! Coordinates a fixed set of independent nodes. A lock is granted when a
//! majority of the configured nodes accept the same fencing token within the
//! lease's validity budget:
//!
//! ```text
//! validity = ttl - elapsed - drift      drift = ttl / 100 + 2ms
//! ```
//!
//! Quorum is computed once from the configured node count, never from the
//! connected count. The connected set is only replaced by `connect()` and
//! `close()`; a manager must not be reconnected while lock operations are in
//! flight.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use dlm_common::{
    LockError, MIN_TTL_MS, RandomSource, Result, ThreadRandom, drift_ms, quorum,
};

use crate::config::LockManagerConfig;
use crate::fanout;
use crate::handle::{AbortCallback, Lease, LeaseCoordinator, LockHandle};
use crate::metrics::{
    CONNECTED_NODES, LOCK_ACQUIRED_TOTAL, LOCK_ATTEMPTS_TOTAL, LOCK_FAILED_TOTAL, RENEW_TOTAL,
};
use crate::node::{Node, NodeFactory};

/// Validity left after `elapsed` and the drift margin; may be negative
fn remaining_validity(ttl_ms: u64, elapsed: Duration, drift_ms: u64) -> i64 {
    ttl_ms as i64 - elapsed.as_millis() as i64 - drift_ms as i64
}

struct ManagerInner {
    config: LockManagerConfig,
    quorum: usize,
    nodes: Vec<Arc<dyn Node>>,
    connected: RwLock<Vec<Arc<dyn Node>>>,
    random: Arc<dyn RandomSource>,
    closed: AtomicBool,
}

impl ManagerInner {
    fn connected_nodes(&self) -> Result<Vec<Arc<dyn Node>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LockError::Closed(self.config.name.clone()));
        }
        let nodes = self.connected.read().clone();
        if nodes.is_empty() {
            return Err(LockError::NotConnected);
        }
        Ok(nodes)
    }

    fn publish_connected(&self, count: usize) {
        gauge!(CONNECTED_NODES, "manager" => self.config.name.clone()).set(count as f64);
    }

    async fn close_nodes(nodes: Vec<Arc<dyn Node>>) {
        fanout::exec_all(nodes, |node| async move { node.close().await }).await;
    }

    /// Compare-and-delete the lease on every given node, best effort
    async fn release_all(&self, nodes: &[Arc<dyn Node>], lease: &Lease) {
        let results = fanout::exec_all(nodes.iter().cloned(), |node| {
            let lease = lease.clone();
            async move { node.release(&lease.resource, &lease.token).await }
        })
        .await;

        for (node, outcome) in results {
            if let Err(fault) = outcome {
                warn!(
                    endpoint = %node.endpoint(),
                    resource = %lease.resource,
                    error = %fault,
                    "Release failed on node"
                );
            }
        }
    }
}

#[async_trait]
impl LeaseCoordinator for ManagerInner {
    async fn renew(&self, lease: &Lease, ttl_ms: u64) -> u64 {
        let nodes = self.connected.read().clone();
        let drift = drift_ms(ttl_ms);
        let start = Instant::now();
        let mut renewed = 0;
        let mut validity = 0;

        let mut renewals = fanout::as_completed(nodes.iter().cloned(), |node| {
            let lease = lease.clone();
            async move { node.try_renew(&lease.resource, &lease.token, ttl_ms).await }
        });

        // Renewal always decides as soon as quorum is reached.
        while let Some((node, outcome)) = renewals.next().await {
            match outcome {
                Ok(true) => {
                    renewed += 1;
                    if renewed >= self.quorum {
                        validity = remaining_validity(ttl_ms, start.elapsed(), drift);
                        break;
                    }
                }
                Ok(false) => {
                    debug!(endpoint = %node.endpoint(), resource = %lease.resource, "Node declined renewal");
                }
                Err(fault) => {
                    warn!(endpoint = %node.endpoint(), resource = %lease.resource, error = %fault, "Renewal failed on node");
                }
            }
        }
        drop(renewals);

        if validity > 0 {
            counter!(RENEW_TOTAL, "manager" => self.config.name.clone(), "result" => "renewed")
                .increment(1);
            return validity as u64;
        }

        warn!(
            resource = %lease.resource,
            renewed = renewed,
            quorum = self.quorum,
            "Renewal did not reach quorum in time"
        );
        counter!(RENEW_TOTAL, "manager" => self.config.name.clone(), "result" => "lost").increment(1);
        self.release_all(&nodes, lease).await;
        0
    }

    async fn unlock(&self, lease: &Lease) {
        let nodes = self.connected.read().clone();
        self.release_all(&nodes, lease).await;
    }
}

/// Distributed lock manager over a fixed set of nodes
///
/// Cheap to clone; clones share the same nodes and connection state.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<ManagerInner>,
}

impl LockManager {
    /// Create a manager with one node per configured endpoint
    pub fn new(config: LockManagerConfig, factory: &dyn NodeFactory) -> Result<Self> {
        Self::with_random(config, factory, Arc::new(ThreadRandom))
    }

    /// Create a manager drawing tokens and backoff delays from `random`
    pub fn with_random(
        config: LockManagerConfig,
        factory: &dyn NodeFactory,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        config.validate()?;

        let nodes: Vec<Arc<dyn Node>> = config
            .endpoints
            .iter()
            .map(|endpoint| factory.create(endpoint))
            .collect();
        let quorum = quorum(nodes.len());

        debug!(
            name = %config.name,
            nodes = nodes.len(),
            quorum = quorum,
            "Lock manager created"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                quorum,
                nodes,
                connected: RwLock::new(Vec::new()),
                random,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.inner.config
    }

    /// Nodes that must agree for a decision, fixed at construction
    pub fn quorum(&self) -> usize {
        self.inner.quorum
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn connected_count(&self) -> usize {
        self.inner.connected.read().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Connect to every configured node, replacing any previous connections.
    ///
    /// Fails when fewer than a quorum of nodes are reachable; in that case
    /// every node is closed and the manager is left disconnected.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(LockError::Closed(inner.config.name.clone()));
        }

        let previous = std::mem::take(&mut *inner.connected.write());
        if !previous.is_empty() {
            ManagerInner::close_nodes(previous).await;
        }

        let results = fanout::exec_all(inner.nodes.iter().cloned(), |node| async move {
            node.connect().await
        })
        .await;

        let connected: Vec<Arc<dyn Node>> = results
            .into_iter()
            .filter_map(|(node, outcome)| match outcome {
                Ok(true) => Some(node),
                Ok(false) => {
                    warn!(endpoint = %node.endpoint(), "Node connect failed");
                    None
                }
                Err(fault) => {
                    warn!(endpoint = %node.endpoint(), error = %fault, "Node connect failed");
                    None
                }
            })
            .collect();

        let count = connected.len();
        inner.publish_connected(count);

        if count < inner.quorum {
            ManagerInner::close_nodes(inner.nodes.clone()).await;
            warn!(
                name = %inner.config.name,
                connected = count,
                quorum = inner.quorum,
                "Cannot obtain quorum of nodes"
            );
            return Err(LockError::QuorumUnreachable {
                connected: count,
                required: inner.quorum,
            });
        }

        *inner.connected.write() = connected;
        info!(
            name = %inner.config.name,
            connected = count,
            configured = inner.nodes.len(),
            "Lock manager connected"
        );
        Ok(())
    }

    /// Try to acquire `resource` for `ttl_ms` milliseconds.
    ///
    /// Returns `Ok(None)` when the lock could not be obtained within the
    /// configured retries. With `max_renew > 0` the handle renews itself up to
    /// that many times; `on_abort` fires if a renewal fails.
    pub async fn lock(
        &self,
        resource: &str,
        ttl_ms: u64,
        max_renew: u32,
        on_abort: Option<AbortCallback>,
    ) -> Result<Option<LockHandle>> {
        let inner = &self.inner;
        if ttl_ms < MIN_TTL_MS {
            return Err(LockError::invalid_argument(format!(
                "ttl must be >= {} milliseconds, got {}",
                MIN_TTL_MS, ttl_ms
            )));
        }
        let nodes = inner.connected_nodes()?;

        let lease = Lease {
            resource: resource.to_string(),
            token: inner.random.next_token(),
            ttl_ms,
        };
        let drift = drift_ms(ttl_ms);
        let total = nodes.len();
        let retry_count = inner.config.retry_count;

        for attempt in 1..=retry_count {
            counter!(LOCK_ATTEMPTS_TOTAL, "manager" => inner.config.name.clone()).increment(1);

            let start = Instant::now();
            let mut granted = 0;
            let mut responses = 0;
            let mut validity = None;

            let mut acquisitions = fanout::as_completed(nodes.iter().cloned(), |node| {
                let lease = lease.clone();
                async move {
                    node.try_acquire(&lease.resource, &lease.token, lease.ttl_ms)
                        .await
                }
            });

            while let Some((node, outcome)) = acquisitions.next().await {
                responses += 1;
                match outcome {
                    Ok(true) => granted += 1,
                    Ok(false) => {
                        debug!(endpoint = %node.endpoint(), resource = %resource, "Node declined lock");
                    }
                    Err(fault) => {
                        warn!(endpoint = %node.endpoint(), resource = %resource, error = %fault, "Lock failed on node");
                    }
                }

                if granted >= inner.quorum
                    && (inner.config.shortcircuit_on_quorum || responses == total)
                {
                    validity = Some(remaining_validity(ttl_ms, start.elapsed(), drift));
                    break;
                }
            }
            // Stragglers keep running; the release below cleans up after them.
            drop(acquisitions);

            if let Some(validity) = validity.filter(|v| *v > 0) {
                let coordinator: Arc<dyn LeaseCoordinator> = inner.clone();
                let handle = LockHandle::grant(
                    coordinator,
                    lease,
                    granted,
                    validity as u64,
                    max_renew,
                    on_abort,
                );
                info!(
                    resource = %resource,
                    attempt = attempt,
                    granted = granted,
                    validity_ms = validity,
                    "Lock acquired"
                );
                counter!(LOCK_ACQUIRED_TOTAL, "manager" => inner.config.name.clone()).increment(1);
                return Ok(Some(handle));
            }

            debug!(
                resource = %resource,
                attempt = attempt,
                granted = granted,
                quorum = inner.quorum,
                "Lock attempt failed"
            );
            inner.release_all(&nodes, &lease).await;

            if attempt < retry_count {
                let delay = inner.random.next_delay_ms(
                    inner.config.retry_delay_min_ms,
                    inner.config.retry_delay_max_ms,
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        info!(resource = %resource, retries = retry_count, "Lock not obtained");
        counter!(LOCK_FAILED_TOTAL, "manager" => inner.config.name.clone()).increment(1);
        Ok(None)
    }

    /// Acquire `resource`, run `f` with the handle, then release it.
    ///
    /// Returns `Ok(None)` without running `f` when the lock is not obtained.
    pub async fn with_lock<F, Fut, R>(
        &self,
        resource: &str,
        ttl_ms: u64,
        max_renew: u32,
        on_abort: Option<AbortCallback>,
        f: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = R>,
    {
        let Some(handle) = self.lock(resource, ttl_ms, max_renew, on_abort).await? else {
            return Ok(None);
        };
        let result = f(handle.clone()).await;
        handle.unlock().await;
        Ok(Some(result))
    }

    /// Close every configured node. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.connected.write().clear();
        inner.publish_connected(0);
        ManagerInner::close_nodes(inner.nodes.clone()).await;
        info!(name = %inner.config.name, "Lock manager closed");
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("name", &self.inner.config.name)
            .field("nodes", &self.inner.nodes.len())
            .field("quorum", &self.inner.quorum)
            .field("connected", &self.connected_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
