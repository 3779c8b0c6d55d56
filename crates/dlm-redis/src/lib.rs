//! DLM Redis - Redis storage node
//!
//! Each [`RedisNode`] talks to one independent Redis server. Acquisition is a
//! `SET key token NX PX ttl`; release and renewal are Lua scripts that compare
//! the stored token before deleting or extending the key, so only the holder
//! of a lease can touch it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{debug, warn};

use dlm_common::KEY_PREFIX;
use dlm_core::{LockManagerConfig, Node, NodeFactory};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Connection settings shared by every Redis node of a manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisNodeConfig {
    /// Upper bound on establishing the connection
    pub connect_timeout: Duration,
    /// Prefix prepended to resource names
    pub key_prefix: String,
}

impl Default for RedisNodeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            key_prefix: KEY_PREFIX.to_string(),
        }
    }
}

impl RedisNodeConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

impl From<&LockManagerConfig> for RedisNodeConfig {
    fn from(config: &LockManagerConfig) -> Self {
        Self::default().with_key_prefix(config.key_prefix.clone())
    }
}

/// Turn `host:port` into a `redis://` URL; full URLs pass through unchanged
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("redis://{}", endpoint)
    }
}

/// One Redis server taking part in the quorum
pub struct RedisNode {
    endpoint: String,
    config: RedisNodeConfig,
    release_script: Script,
    renew_script: Script,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisNode {
    pub fn new(endpoint: impl Into<String>, config: RedisNodeConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            release_script: Script::new(RELEASE_SCRIPT),
            renew_script: Script::new(RENEW_SCRIPT),
            connection: Mutex::new(None),
        }
    }

    pub fn key(&self, resource: &str) -> String {
        format!("{}{}", self.config.key_prefix, resource)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn connection(&self) -> Option<MultiplexedConnection> {
        self.connection.lock().clone()
    }

    async fn open(&self) -> Result<MultiplexedConnection, String> {
        let client = Client::open(normalize_endpoint(&self.endpoint)).map_err(|e| e.to_string())?;
        match tokio::time::timeout(
            self.config.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.config.connect_timeout.as_millis()
            )),
        }
    }
}

#[async_trait]
impl Node for RedisNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> bool {
        match self.open().await {
            Ok(conn) => {
                *self.connection.lock() = Some(conn);
                debug!(endpoint = %self.endpoint, "Connected to Redis node");
                true
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Failed to connect to Redis node");
                false
            }
        }
    }

    async fn try_acquire(&self, resource: &str, token: &str, ttl_ms: u64) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };

        let reply: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(self.key(resource))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(set) => set.is_some(),
            Err(e) => {
                warn!(endpoint = %self.endpoint, resource = %resource, error = %e, "Redis SET NX failed");
                false
            }
        }
    }

    async fn release(&self, resource: &str, token: &str) {
        let Some(mut conn) = self.connection() else {
            return;
        };

        let reply: redis::RedisResult<i64> = self
            .release_script
            .key(self.key(resource))
            .arg(token)
            .invoke_async(&mut conn)
            .await;

        if let Err(e) = reply {
            warn!(endpoint = %self.endpoint, resource = %resource, error = %e, "Redis release script failed");
        }
    }

    async fn try_renew(&self, resource: &str, token: &str, ttl_ms: u64) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };

        let reply: redis::RedisResult<i64> = self
            .renew_script
            .key(self.key(resource))
            .arg(token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await;

        match reply {
            Ok(extended) => extended == 1,
            Err(e) => {
                warn!(endpoint = %self.endpoint, resource = %resource, error = %e, "Redis renew script failed");
                false
            }
        }
    }

    async fn close(&self) {
        if self.connection.lock().take().is_some() {
            debug!(endpoint = %self.endpoint, "Closed Redis node connection");
        }
    }
}

/// Creates a [`RedisNode`] per configured endpoint
#[derive(Clone, Debug, Default)]
pub struct RedisNodeFactory {
    config: RedisNodeConfig,
}

impl RedisNodeFactory {
    pub fn new(config: RedisNodeConfig) -> Self {
        Self { config }
    }
}

impl NodeFactory for RedisNodeFactory {
    fn create(&self, endpoint: &str) -> Arc<dyn Node> {
        Arc::new(RedisNode::new(endpoint, self.config.clone()))
    }
}
