//! Storage node contract
//!
//! A node is one independent storage backend taking part in the quorum.
//! Every primitive must run as a single atomic operation on the node, and
//! none of them may fail across this boundary: transport or storage errors
//! are logged by the implementation and reported as `false` (or ignored,
//! for `release` and `close`).

mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryNode;

/// One storage peer participating in the quorum
#[async_trait]
pub trait Node: Send + Sync {
    /// Connection endpoint identifying this node
    fn endpoint(&self) -> &str;

    /// Establish the underlying connection, `false` on any failure
    async fn connect(&self) -> bool;

    /// Create `resource` holding `token` with a `ttl_ms` expiry, only if absent
    async fn try_acquire(&self, resource: &str, token: &str, ttl_ms: u64) -> bool;

    /// Delete `resource` only if it currently holds `token`
    async fn release(&self, resource: &str, token: &str);

    /// Reset the expiry of `resource` to `ttl_ms` only if it currently holds `token`
    async fn try_renew(&self, resource: &str, token: &str, ttl_ms: u64) -> bool;

    /// Drop the underlying connection. Idempotent.
    async fn close(&self);
}

/// Creates the node for a configured endpoint
pub trait NodeFactory: Send + Sync {
    fn create(&self, endpoint: &str) -> Arc<dyn Node>;
}

impl<F> NodeFactory for F
where
    F: Fn(&str) -> Arc<dyn Node> + Send + Sync,
{
    fn create(&self, endpoint: &str) -> Arc<dyn Node> {
        self(endpoint)
    }
}
