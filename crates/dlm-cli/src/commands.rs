use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tracing::{info, warn};

use dlm_core::{AbortCallback, LockHandle, LockManager, LockManagerConfig, Node, NodeFactory, fanout};
use dlm_redis::{RedisNodeConfig, RedisNodeFactory};

fn factory_for(config: &LockManagerConfig) -> RedisNodeFactory {
    RedisNodeFactory::new(RedisNodeConfig::from(config))
}

/// Acquire `resource`, keep it for `hold`, release it
pub async fn hold(
    config: LockManagerConfig,
    resource: &str,
    ttl_ms: u64,
    max_renew: u32,
    hold: Duration,
) -> anyhow::Result<()> {
    let manager = LockManager::new(config.clone(), &factory_for(&config))?;
    manager.connect().await?;

    let on_abort: AbortCallback = Arc::new(|handle: &LockHandle| {
        warn!(resource = %handle.resource(), "Lease lost while held");
    });

    let outcome = manager
        .with_lock(resource, ttl_ms, max_renew, Some(on_abort), |handle| async move {
            let validity_ms = handle.validity_ms().await;
            info!(
                resource = %handle.resource(),
                token = %handle.token(),
                granted = handle.granted_count(),
                validity_ms = validity_ms,
                "Holding lock"
            );
            tokio::select! {
                _ = tokio::time::sleep(hold) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted, releasing early"),
            }
            handle.is_locked()
        })
        .await;

    manager.close().await;

    match outcome? {
        Some(true) => {
            println!("{}: held and released", resource);
            Ok(())
        }
        Some(false) => bail!("lease on '{}' was lost before release", resource),
        None => bail!(
            "could not acquire '{}' after {} attempts",
            resource,
            config.retry_count
        ),
    }
}

/// Connect to every configured node and print its reachability
pub async fn probe(config: LockManagerConfig) -> anyhow::Result<()> {
    let factory = factory_for(&config);
    let nodes: Vec<Arc<dyn Node>> = config
        .endpoints
        .iter()
        .map(|endpoint| factory.create(endpoint))
        .collect();

    let results = fanout::exec_all(nodes.iter().cloned(), |node| async move {
        let connected = node.connect().await;
        node.close().await;
        connected
    })
    .await;

    let mut reachable = 0;
    for (node, outcome) in &results {
        let status = match outcome {
            Ok(true) => {
                reachable += 1;
                "ok".to_string()
            }
            Ok(false) => "unreachable".to_string(),
            Err(fault) => format!("error: {}", fault),
        };
        println!("{:<40} {}", node.endpoint(), status);
    }

    let quorum = config.quorum();
    println!(
        "{} of {} nodes reachable, quorum is {}",
        reachable,
        results.len(),
        quorum
    );

    if reachable < quorum {
        bail!("quorum unreachable");
    }
    Ok(())
}
