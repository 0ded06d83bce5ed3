use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use serde::Serialize;

use crate::utils::{Backoff, MonitorError, Result};

/// Errors produced inside a `call` closure. Transport, contract and decoding
/// failures all flow through the same boxed form and get classified as `Rpc`
/// against the endpoint that served the attempt.
pub type CallError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Health snapshot served at `/api/health`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcHealth {
    #[serde(rename = "httpEndpoint")]
    pub http_endpoint: String,
    pub healthy: bool,
    #[serde(rename = "latencyMs")]
    pub latency_ms: Option<u64>,
    #[serde(rename = "wssEndpoint")]
    pub wss_endpoint: String,
    #[serde(rename = "pushConnected")]
    pub push_connected: bool,
}

/// Ordered pool of request endpoints plus the push-endpoint cursor.
///
/// Providers are built fresh from the active endpoint for every call, so a
/// rotation can never leave a caller holding a binding to a dead endpoint.
pub struct RpcPool {
    http_endpoints: Vec<String>,
    wss_endpoints: Vec<String>,
    active_http: AtomicUsize,
    active_wss: AtomicUsize,
    push_connections: AtomicUsize,
}

impl RpcPool {
    pub fn new(http_endpoints: Vec<String>, wss_endpoints: Vec<String>) -> Result<Self> {
        if http_endpoints.is_empty() || wss_endpoints.is_empty() {
            return Err(MonitorError::Config(
                "RPC pool requires at least one HTTP and one WSS endpoint".into(),
            ));
        }
        Ok(Self {
            http_endpoints,
            wss_endpoints,
            active_http: AtomicUsize::new(0),
            active_wss: AtomicUsize::new(0),
            push_connections: AtomicUsize::new(0),
        })
    }

    pub fn current_request_endpoint(&self) -> &str {
        &self.http_endpoints[self.active_http.load(Ordering::Relaxed) % self.http_endpoints.len()]
    }

    pub fn current_push_endpoint(&self) -> &str {
        &self.wss_endpoints[self.active_wss.load(Ordering::Relaxed) % self.wss_endpoints.len()]
    }

    /// Advance the active request endpoint, wrapping at the end of the list.
    pub fn rotate_request(&self) {
        let next = (self.active_http.load(Ordering::Relaxed) + 1) % self.http_endpoints.len();
        self.active_http.store(next, Ordering::Relaxed);
        tracing::warn!(endpoint = self.current_request_endpoint(), "Rotated RPC endpoint");
    }

    pub fn rotate_push(&self) {
        let next = (self.active_wss.load(Ordering::Relaxed) + 1) % self.wss_endpoints.len();
        self.active_wss.store(next, Ordering::Relaxed);
    }

    /// Build a provider bound to the active request endpoint.
    pub fn provider(&self) -> Result<DynProvider> {
        let endpoint = self.current_request_endpoint();
        let url = endpoint
            .parse()
            .map_err(|e| MonitorError::rpc(endpoint, format!("invalid endpoint URL: {}", e)))?;
        Ok(ProviderBuilder::new().connect_http(url).erased())
    }

    /// Execute `op` under the pool's retry discipline: one attempt per
    /// configured endpoint, rotating on failure, 500 ms base delay doubling
    /// up to 5 s. The error of the last attempt surfaces as fatal.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = std::result::Result<T, CallError>>,
    {
        let max_attempts = self.http_endpoints.len();
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));
        let mut last_err = None;

        for attempt in 0..max_attempts {
            let endpoint = self.current_request_endpoint().to_string();
            let outcome = match self.provider() {
                Ok(provider) => op(provider)
                    .await
                    .map_err(|e| MonitorError::rpc(endpoint.as_str(), e)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "RPC call failed"
                    );
                    last_err = Some(e);
                    if attempt + 1 < max_attempts {
                        self.rotate_request();
                        tokio::time::sleep(backoff.next()).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| MonitorError::Generic("RPC pool exhausted".into())))
    }

    /// Race `eth_blockNumber` across every endpoint (5 s each) and make the
    /// lowest-latency one active.
    pub async fn select_fastest(&self) {
        let probes = self.http_endpoints.iter().enumerate().map(|(i, endpoint)| {
            let endpoint = endpoint.clone();
            async move {
                let started = Instant::now();
                let latency = match endpoint.parse() {
                    Ok(url) => {
                        let provider = ProviderBuilder::new().connect_http(url);
                        match tokio::time::timeout(
                            Duration::from_secs(5),
                            provider.get_block_number(),
                        )
                        .await
                        {
                            Ok(Ok(_)) => Some(started.elapsed()),
                            _ => None,
                        }
                    }
                    Err(_) => None,
                };
                (i, endpoint, latency)
            }
        });

        let results = futures::future::join_all(probes).await;
        let fastest = results
            .iter()
            .filter_map(|(i, _, latency)| latency.map(|l| (*i, l)))
            .min_by_key(|(_, l)| *l);

        match fastest {
            Some((index, latency)) => {
                self.active_http.store(index, Ordering::Relaxed);
                tracing::info!(
                    endpoint = self.current_request_endpoint(),
                    latency_ms = latency.as_millis() as u64,
                    "Selected fastest RPC endpoint"
                );
            }
            None => {
                tracing::warn!("No RPC endpoint answered the latency probe; keeping current");
            }
        }
    }

    /// Measure a single call on the active endpoint and report the most
    /// recent push connection flag.
    pub async fn health_snapshot(&self) -> RpcHealth {
        let endpoint = self.current_request_endpoint().to_string();
        let started = Instant::now();
        let healthy = match self.provider() {
            Ok(provider) => tokio::time::timeout(
                Duration::from_secs(5),
                provider.get_block_number(),
            )
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false),
            Err(_) => false,
        };
        let latency_ms = healthy.then(|| started.elapsed().as_millis() as u64);

        RpcHealth {
            http_endpoint: endpoint,
            healthy,
            latency_ms,
            wss_endpoint: self.current_push_endpoint().to_string(),
            push_connected: self.push_connections.load(Ordering::Relaxed) > 0,
        }
    }

    /// Called by push clients as their connection comes and goes.
    pub fn mark_push_connected(&self, connected: bool) {
        if connected {
            self.push_connections.fetch_add(1, Ordering::Relaxed);
        } else {
            let _ = self
                .push_connections
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    Some(n.saturating_sub(1))
                });
        }
    }

    /// Number of live push connections across all monitors.
    pub fn push_connection_count(&self) -> usize {
        self.push_connections.load(Ordering::Relaxed)
    }

    pub fn endpoint_count(&self) -> usize {
        self.http_endpoints.len()
    }

    /// Providers are built per call, so there is nothing cached to close
    /// beyond the push connections owned by the monitors.
    pub fn shutdown(&self) {
        tracing::info!("RPC pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(http: &[&str]) -> RpcPool {
        RpcPool::new(
            http.iter().map(|s| s.to_string()).collect(),
            vec!["wss://one.example".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_rotation_wraps() {
        let pool = pool(&["http://a.example", "http://b.example"]);
        assert_eq!(pool.current_request_endpoint(), "http://a.example");
        pool.rotate_request();
        assert_eq!(pool.current_request_endpoint(), "http://b.example");
        pool.rotate_request();
        assert_eq!(pool.current_request_endpoint(), "http://a.example");
    }

    #[test]
    fn test_empty_lists_rejected() {
        assert!(RpcPool::new(vec![], vec!["wss://x".into()]).is_err());
        assert!(RpcPool::new(vec!["http://x".into()], vec![]).is_err());
    }

    #[test]
    fn test_push_connection_flag() {
        let pool = pool(&["http://a.example"]);
        assert_eq!(pool.push_connection_count(), 0);
        pool.mark_push_connected(true);
        pool.mark_push_connected(true);
        assert_eq!(pool.push_connection_count(), 2);
        pool.mark_push_connected(false);
        pool.mark_push_connected(false);
        pool.mark_push_connected(false); // saturates at zero
        assert_eq!(pool.push_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_call_attempts_equal_list_length() {
        let pool = pool(&["http://a.invalid", "http://b.invalid", "http://c.invalid"]);
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let result: Result<u64> = pool
            .call(|_provider| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err("boom".into()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        // Rotated past a and b, no rotation after the final attempt.
        assert_eq!(pool.current_request_endpoint(), "http://c.invalid");
    }
}
