//! DLM Core - Quorum-based distributed mutual exclusion
//!
//! A [`LockManager`] talks to a fixed set of independent storage [`Node`]s
//! and grants a lock once a majority of them accept the same random token
//! before the lease's validity runs out. The returned [`LockHandle`] can
//! renew itself a bounded number of times and is released with
//! [`LockHandle::unlock`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use dlm_core::{LockManager, LockManagerConfig, MemoryNode, Node};
//!
//! # async fn run() -> dlm_core::Result<()> {
//! let config = LockManagerConfig::new(["a", "b", "c"]);
//! let factory = |endpoint: &str| Arc::new(MemoryNode::new(endpoint)) as Arc<dyn Node>;
//! let manager = LockManager::new(config, &factory)?;
//! manager.connect().await?;
//!
//! if let Some(handle) = manager.lock("orders", 10_000, 3, None).await? {
//!     // critical section
//!     handle.unlock().await;
//! }
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod fanout;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod node;

pub use config::LockManagerConfig;
pub use fanout::{Fault, Outcome};
pub use handle::{AbortCallback, Lease, LeaseCoordinator, LockHandle};
pub use manager::LockManager;
pub use node::{MemoryNode, Node, NodeFactory};

pub use dlm_common::{LockError, Result};
