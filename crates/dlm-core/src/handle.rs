//! Lock handle: one granted lease and its renewal cycle
//!
//! A handle starts out granted and ends released, either through an explicit
//! [`LockHandle::unlock`] or because a renewal failed (the abort path). Both
//! transitions, and every renewal, run under a single per-handle mutex so a
//! timer-driven renewal can never interleave with an explicit unlock.
//!
//! ```text
//!   Granted ──unlock()────────────────▶ Released
//!      │                                   ▲
//!      └──renewal failed / budget spent────┘ (abort callback fires)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dlm_common::RENEW_BUFFER_MS;

/// Invoked once when a lease is lost because renewal failed
pub type AbortCallback = Arc<dyn Fn(&LockHandle) + Send + Sync>;

/// Identity of one lease on one resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    pub resource: String,
    pub token: String,
    pub ttl_ms: u64,
}

/// The side of the lock manager a handle calls back into
#[async_trait]
pub trait LeaseCoordinator: Send + Sync {
    /// Extend the lease on a quorum of nodes, returning the new validity or 0 on failure
    async fn renew(&self, lease: &Lease, ttl_ms: u64) -> u64;

    /// Release the lease on every connected node
    async fn unlock(&self, lease: &Lease);
}

struct HandleState {
    validity_ms: u64,
    renew_count: u32,
    renew_timer: Option<JoinHandle<()>>,
}

struct HandleShared {
    lease: Lease,
    granted_count: usize,
    max_renew: u32,
    on_abort: Option<AbortCallback>,
    coordinator: Arc<dyn LeaseCoordinator>,
    // Only flipped while `state` is held; read without it for the idempotency fast path.
    locked: AtomicBool,
    state: Mutex<HandleState>,
}

fn renew_delay(validity_ms: u64) -> Duration {
    Duration::from_millis(validity_ms.saturating_sub(RENEW_BUFFER_MS))
}

fn arm_timer(shared: &Arc<HandleShared>, delay: Duration) -> JoinHandle<()> {
    let weak: Weak<HandleShared> = Arc::downgrade(shared);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(shared) = weak.upgrade() {
            HandleShared::on_renew_timer(shared).await;
        }
    })
}

impl HandleShared {
    /// Release sequence. Caller must hold `state`.
    async fn release(&self, state: &mut HandleState) -> bool {
        if !self.locked.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(timer) = state.renew_timer.take() {
            timer.abort();
        }
        self.coordinator.unlock(&self.lease).await;
        true
    }

    fn on_renew_timer(shared: Arc<HandleShared>) -> BoxFuture<'static, ()> {
        async move {
            let aborted = {
                let mut state = shared.state.lock().await;
                // The armed timer is this task; detach it instead of aborting ourselves.
                state.renew_timer.take();
                state.renew_count += 1;
                state.validity_ms = 0;

                if state.renew_count <= shared.max_renew && shared.locked.load(Ordering::Acquire) {
                    let validity = shared
                        .coordinator
                        .renew(&shared.lease, shared.lease.ttl_ms)
                        .await;
                    state.validity_ms = validity;
                    if validity > 0 {
                        state.renew_timer = Some(arm_timer(&shared, renew_delay(validity)));
                        debug!(
                            resource = %shared.lease.resource,
                            renew_count = state.renew_count,
                            validity_ms = validity,
                            "Lock renewed"
                        );
                    }
                }

                if state.validity_ms == 0 {
                    shared.release(&mut state).await
                } else {
                    false
                }
            };

            if aborted {
                warn!(
                    resource = %shared.lease.resource,
                    max_renew = shared.max_renew,
                    "Lock renewal failed, lease aborted"
                );
                // Runs with the handle mutex released, so the callback may call unlock().
                if let Some(on_abort) = &shared.on_abort {
                    on_abort(&LockHandle {
                        shared: shared.clone(),
                    });
                }
            }
        }
        .boxed()
    }
}

impl Drop for HandleShared {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().renew_timer.take() {
            timer.abort();
        }
        if !*self.locked.get_mut() {
            return;
        }
        *self.locked.get_mut() = false;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let coordinator = self.coordinator.clone();
                let lease = self.lease.clone();
                runtime.spawn(async move {
                    coordinator.unlock(&lease).await;
                });
                debug!(resource = %self.lease.resource, "Lock handle dropped, releasing in background");
            }
            Err(_) => {
                warn!(
                    resource = %self.lease.resource,
                    "Lock handle dropped outside a runtime, lease left to expire"
                );
            }
        }
    }
}

/// A granted lease on a resource
///
/// Cloning a handle shares the same lease. When the last clone is dropped
/// while the lease is still held, it is released in the background; call
/// [`unlock`](Self::unlock) to release deterministically.
#[derive(Clone)]
pub struct LockHandle {
    shared: Arc<HandleShared>,
}

impl LockHandle {
    /// Build a granted handle and arm its renewal timer when `max_renew > 0`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn grant(
        coordinator: Arc<dyn LeaseCoordinator>,
        lease: Lease,
        granted_count: usize,
        validity_ms: u64,
        max_renew: u32,
        on_abort: Option<AbortCallback>,
    ) -> Self {
        let shared = Arc::new(HandleShared {
            lease,
            granted_count,
            max_renew,
            on_abort,
            coordinator,
            locked: AtomicBool::new(true),
            state: Mutex::new(HandleState {
                validity_ms,
                renew_count: 0,
                renew_timer: None,
            }),
        });

        if max_renew > 0 {
            // Freshly created, so the mutex is uncontended.
            if let Ok(mut state) = shared.state.try_lock() {
                state.renew_timer = Some(arm_timer(&shared, renew_delay(validity_ms)));
            }
        }

        Self { shared }
    }

    /// Release the lease on every node. A no-op once released.
    pub async fn unlock(&self) {
        if !self.shared.locked.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.shared.state.lock().await;
        if self.shared.release(&mut state).await {
            info!(resource = %self.shared.lease.resource, "Lock released");
        }
    }

    pub fn lease(&self) -> &Lease {
        &self.shared.lease
    }

    pub fn resource(&self) -> &str {
        &self.shared.lease.resource
    }

    pub fn token(&self) -> &str {
        &self.shared.lease.token
    }

    pub fn ttl_ms(&self) -> u64 {
        self.shared.lease.ttl_ms
    }

    /// Number of nodes that granted the lease
    pub fn granted_count(&self) -> usize {
        self.shared.granted_count
    }

    pub fn max_renew(&self) -> u32 {
        self.shared.max_renew
    }

    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    /// Remaining validity as of the last grant or renewal
    pub async fn validity_ms(&self) -> u64 {
        self.shared.state.lock().await.validity_ms
    }

    pub async fn renew_count(&self) -> u32 {
        self.shared.state.lock().await.renew_count
    }

    pub async fn has_renew_timer(&self) -> bool {
        self.shared.state.lock().await.renew_timer.is_some()
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("resource", &self.shared.lease.resource)
            .field("ttl_ms", &self.shared.lease.ttl_ms)
            .field("granted_count", &self.shared.granted_count)
            .field("max_renew", &self.shared.max_renew)
            .field("locked", &self.is_locked())
            .finish()
    }
}
