//! Shared helpers for lock manager integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dlm_common::SeededRandom;
use dlm_core::{LockManager, LockManagerConfig, Node};

/// Node whose answers are scripted per call
///
/// Each primitive pops the next scripted answer and falls back to the
/// default once the script runs dry. Every call is counted.
pub struct ScriptedNode {
    endpoint: String,
    connect_ok: AtomicBool,
    acquire_script: Mutex<VecDeque<bool>>,
    acquire_default: AtomicBool,
    renew_script: Mutex<VecDeque<bool>>,
    renew_default: AtomicBool,
    latency: Mutex<Duration>,
    crash_on_acquire: AtomicBool,

    pub connects: AtomicUsize,
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    pub renews: AtomicUsize,
    pub closes: AtomicUsize,
}

impl ScriptedNode {
    pub fn new(endpoint: &str) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            connect_ok: AtomicBool::new(true),
            acquire_script: Mutex::new(VecDeque::new()),
            acquire_default: AtomicBool::new(true),
            renew_script: Mutex::new(VecDeque::new()),
            renew_default: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            crash_on_acquire: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            renews: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn set_connect(&self, ok: bool) {
        self.connect_ok.store(ok, Ordering::SeqCst);
    }

    pub fn script_acquire(&self, answers: &[bool]) {
        self.acquire_script.lock().extend(answers.iter().copied());
    }

    pub fn set_acquire_default(&self, ok: bool) {
        self.acquire_default.store(ok, Ordering::SeqCst);
    }

    pub fn script_renew(&self, answers: &[bool]) {
        self.renew_script.lock().extend(answers.iter().copied());
    }

    pub fn set_renew_default(&self, ok: bool) {
        self.renew_default.store(ok, Ordering::SeqCst);
    }

    /// Delay applied to acquire and renew calls
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Panic inside `try_acquire`, as a buggy node implementation would
    pub fn set_crash_on_acquire(&self, crash: bool) {
        self.crash_on_acquire.store(crash, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Node for ScriptedNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connect_ok.load(Ordering::SeqCst)
    }

    async fn try_acquire(&self, _resource: &str, _token: &str, _ttl_ms: u64) -> bool {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.crash_on_acquire.load(Ordering::SeqCst) {
            panic!("node {} crashed", self.endpoint);
        }
        let scripted = self.acquire_script.lock().pop_front();
        scripted.unwrap_or_else(|| self.acquire_default.load(Ordering::SeqCst))
    }

    async fn release(&self, _resource: &str, _token: &str) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    async fn try_renew(&self, _resource: &str, _token: &str, _ttl_ms: u64) -> bool {
        self.renews.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let scripted = self.renew_script.lock().pop_front();
        scripted.unwrap_or_else(|| self.renew_default.load(Ordering::SeqCst))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted nodes named `n0..n{count}`
pub fn scripted_nodes(count: usize) -> Vec<Arc<ScriptedNode>> {
    (0..count).map(|i| ScriptedNode::new(&format!("n{i}"))).collect()
}

/// Config over the given nodes with zero backoff
pub fn config_for(nodes: &[Arc<ScriptedNode>]) -> LockManagerConfig {
    LockManagerConfig::new(nodes.iter().map(|n| n.endpoint.clone())).with_retry_delay(0, 0)
}

/// Manager whose factory hands out the given nodes by endpoint
pub fn manager_for(nodes: &[Arc<ScriptedNode>], config: LockManagerConfig) -> LockManager {
    let by_endpoint: HashMap<String, Arc<ScriptedNode>> = nodes
        .iter()
        .map(|n| (n.endpoint.clone(), n.clone()))
        .collect();
    let factory = move |endpoint: &str| -> Arc<dyn Node> { by_endpoint[endpoint].clone() };

    LockManager::with_random(config, &factory, Arc::new(SeededRandom::new(7)))
        .expect("valid config")
}
