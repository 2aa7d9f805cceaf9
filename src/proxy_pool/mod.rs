//! Upstream proxy pool: validates, scores, and selects HTTP/SOCKS proxies.
//!
//! Grounded on the original `proxy_manager.py` (`ProxyManager`), rewritten
//! around a single `tokio::sync::Mutex`-guarded map rather than two
//! parallel collections, so every entry always has a matching stats record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IteratorRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::config::defaults::{PROXY_FAILURE_THRESHOLD, PROXY_TEST_URLS};
use crate::http_client::ClientFactory;

/// A validated upstream proxy and its running success/failure counters.
#[derive(Debug, Clone, Default)]
pub struct ProxyEntry {
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
pub struct PoolStats {
    pub working_count: usize,
    pub total_success: u64,
    pub total_failures: u64,
    pub per_proxy: HashMap<String, ProxyEntry>,
}

struct PoolState {
    /// Preserves insertion order so `pick()` has a stable, inspectable set.
    order: Vec<String>,
    entries: HashMap<String, ProxyEntry>,
}

impl PoolState {
    fn new() -> Self {
        PoolState {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    fn add(&mut self, endpoint: String) {
        if !self.entries.contains_key(&endpoint) {
            self.order.push(endpoint.clone());
            self.entries.insert(endpoint, ProxyEntry::default());
        }
    }

    fn remove(&mut self, endpoint: &str) {
        self.entries.remove(endpoint);
        self.order.retain(|e| e != endpoint);
    }
}

/// Shared, mutation-serialized pool of validated upstream proxies.
pub struct ProxyPool {
    state: Mutex<PoolState>,
    use_proxy: bool,
}

impl ProxyPool {
    pub fn new(use_proxy: bool) -> Self {
        ProxyPool {
            state: Mutex::new(PoolState::new()),
            use_proxy,
        }
    }

    /// Normalizes a raw endpoint: prefixes a scheme if absent, preferring
    /// `socks5://` for the conventional SOCKS ports.
    pub fn normalize_endpoint(raw: &str) -> String {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") || raw.starts_with("socks5://")
        {
            return raw.to_string();
        }
        if raw.contains(":1080") || raw.contains(":9050") {
            format!("socks5://{raw}")
        } else {
            format!("http://{raw}")
        }
    }

    /// Validates each candidate against the built-in liveness targets,
    /// sequentially, adding the working ones to the pool. Returns the
    /// subset that validated.
    pub async fn validate(
        &self,
        candidates: &[String],
        config: &Config,
        factory: &ClientFactory,
    ) -> Vec<String> {
        if candidates.is_empty() {
            warn!("no proxies provided for validation");
            return Vec::new();
        }

        info!("validating {} proxies", candidates.len());
        let mut working = Vec::new();
        let validation_timeout = factory.validation_timeout(config);

        for (i, raw) in candidates.iter().enumerate() {
            let endpoint = Self::normalize_endpoint(raw);
            debug!("testing proxy {}/{}: {}", i + 1, candidates.len(), endpoint);

            if self.test_proxy(&endpoint, validation_timeout, factory).await {
                self.add(endpoint.clone()).await;
                working.push(endpoint);
            } else {
                warn!("proxy failed validation: {}", endpoint);
            }
        }

        info!(
            "proxy validation complete: {}/{} working",
            working.len(),
            candidates.len()
        );
        working
    }

    async fn test_proxy(&self, endpoint: &str, timeout: Duration, factory: &ClientFactory) -> bool {
        let client = match factory.acquire(Default::default(), true, false, Some(endpoint), timeout)
        {
            Ok(c) => c,
            Err(e) => {
                warn!("proxy {} client build failed: {}", endpoint, e);
                return false;
            }
        };

        for test_url in PROXY_TEST_URLS {
            match client.get(*test_url).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    warn!("proxy {} returned {} for {}", endpoint, resp.status(), test_url);
                }
                Err(e) => {
                    warn!("proxy {} failed for {}: {}", endpoint, test_url, e);
                }
            }
        }
        false
    }

    pub async fn add(&self, endpoint: String) {
        let mut state = self.state.lock().await;
        state.add(endpoint);
    }

    /// Uniform-random choice among the current working set.
    pub async fn pick(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .choose(&mut rand::rng())
            .cloned()
    }

    pub async fn succeed(&self, endpoint: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(endpoint) {
            entry.successes += 1;
        }
    }

    /// Increments the failure counter; demotes (removes) the proxy once
    /// failures exceed the fixed threshold.
    pub async fn fail(&self, endpoint: &str) {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get_mut(endpoint) else {
            return;
        };
        entry.failures += 1;
        if entry.failures > PROXY_FAILURE_THRESHOLD as u64 {
            warn!("removing proxy after {} failures: {}", entry.failures, endpoint);
            state.remove(endpoint);
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let mut stats = PoolStats {
            working_count: state.order.len(),
            ..Default::default()
        };
        for (endpoint, entry) in &state.entries {
            stats.total_success += entry.successes;
            stats.total_failures += entry.failures;
            stats.per_proxy.insert(endpoint.clone(), entry.clone());
        }
        stats
    }

    pub async fn available(&self) -> bool {
        self.use_proxy && !self.state.lock().await.order.is_empty()
    }
}

pub type SharedProxyPool = Arc<ProxyPool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_host_port_to_http() {
        assert_eq!(
            ProxyPool::normalize_endpoint("10.0.0.1:8080"),
            "http://10.0.0.1:8080"
        );
    }

    #[test]
    fn normalizes_socks_ports() {
        assert_eq!(
            ProxyPool::normalize_endpoint("10.0.0.1:1080"),
            "socks5://10.0.0.1:1080"
        );
        assert_eq!(
            ProxyPool::normalize_endpoint("10.0.0.1:9050"),
            "socks5://10.0.0.1:9050"
        );
    }

    #[test]
    fn leaves_explicit_scheme_alone() {
        assert_eq!(
            ProxyPool::normalize_endpoint("https://p.example:443"),
            "https://p.example:443"
        );
    }

    #[tokio::test]
    async fn fail_demotes_after_threshold() {
        let pool = ProxyPool::new(true);
        pool.add("http://p".to_string()).await;

        for _ in 0..PROXY_FAILURE_THRESHOLD {
            pool.fail("http://p").await;
        }
        // Still present: failures == threshold, not yet over it.
        assert!(pool.stats().await.per_proxy.contains_key("http://p"));

        pool.fail("http://p").await;
        let stats = pool.stats().await;
        assert!(!stats.per_proxy.contains_key("http://p"));
        assert_eq!(stats.working_count, 0);
    }

    #[tokio::test]
    async fn succeed_increments_counter() {
        let pool = ProxyPool::new(true);
        pool.add("http://p".to_string()).await;
        pool.succeed("http://p").await;
        pool.succeed("http://p").await;
        let stats = pool.stats().await;
        assert_eq!(stats.per_proxy["http://p"].successes, 2);
    }

    #[tokio::test]
    async fn available_requires_use_proxy_and_nonempty() {
        let disabled = ProxyPool::new(false);
        disabled.add("http://p".to_string()).await;
        assert!(!disabled.available().await);

        let enabled = ProxyPool::new(true);
        assert!(!enabled.available().await);
        enabled.add("http://p".to_string()).await;
        assert!(enabled.available().await);
    }

    #[tokio::test]
    async fn pick_returns_none_when_empty() {
        let pool = ProxyPool::new(true);
        assert!(pool.pick().await.is_none());
    }
}
