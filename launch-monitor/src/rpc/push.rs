use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::pool::RpcPool;
use crate::utils::{Backoff, MonitorError, Result};

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

/// One registered subscription: the log filter plus a stable handler
/// identity. Reconnects re-bind the same sender to the new transport; they
/// never replay missed events (block-range scans cover gaps).
struct LogSubscription {
    filter: Filter,
    sender: mpsc::UnboundedSender<Log>,
}

struct Connection {
    generation: u64,
    provider: DynProvider,
    tasks: Vec<JoinHandle<()>>,
}

struct PushState {
    subscriptions: Vec<LogSubscription>,
    connection: Option<Connection>,
    /// Present while a connect attempt is in flight; late callers wait on it.
    connecting: Option<watch::Receiver<bool>>,
    connecting_tx: Option<watch::Sender<bool>>,
    reconnect: Backoff,
    should_reconnect: bool,
    generation: u64,
}

struct PushShared {
    pool: Arc<RpcPool>,
    state: Mutex<PushState>,
}

/// One logical long-lived connection to the selected push endpoint.
///
/// `connect` is idempotent, transport loss schedules a reconnect with delay
/// doubling from 1 s to a 60 s cap, and every registered subscription is
/// replayed against the new transport. `destroy` disables reconnection for
/// good.
#[derive(Clone)]
pub struct PushClient {
    shared: Arc<PushShared>,
}

impl PushClient {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self {
            shared: Arc::new(PushShared {
                pool,
                state: Mutex::new(PushState {
                    subscriptions: Vec::new(),
                    connection: None,
                    connecting: None,
                    connecting_tx: None,
                    reconnect: Backoff::new(RECONNECT_BASE, RECONNECT_CAP),
                    should_reconnect: true,
                    generation: 0,
                }),
            }),
        }
    }

    /// Establish the connection if it is not already up. Concurrent callers
    /// block on the in-progress attempt instead of racing their own.
    pub async fn connect(&self) -> Result<()> {
        loop {
            let waiter = {
                let mut state = self.shared.state.lock().await;
                if state.connection.is_some() {
                    return Ok(());
                }
                if !state.should_reconnect {
                    return Err(MonitorError::Generic("push client destroyed".into()));
                }
                match &state.connecting {
                    Some(rx) => Some(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(false);
                        state.connecting = Some(rx);
                        state.connecting_tx = Some(tx);
                        None
                    }
                }
            };

            match waiter {
                Some(mut rx) => {
                    // Another caller is connecting; wait for it to finish
                    // and re-check the connection.
                    let _ = rx.changed().await;
                }
                None => break,
            }
        }

        let result = attach_task::establish(&self.shared).await;

        let mut state = self.shared.state.lock().await;
        if let Some(tx) = state.connecting_tx.take() {
            let _ = tx.send(true);
        }
        state.connecting = None;
        result.map(|_| ())
    }

    /// Register a subscription and, when connected, attach it to the live
    /// transport immediately. A later reconnect re-attaches automatically.
    pub async fn add_subscription(
        &self,
        filter: Filter,
        sender: mpsc::UnboundedSender<Log>,
    ) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        let subscription = LogSubscription {
            filter: filter.clone(),
            sender: sender.clone(),
        };

        if let Some(connection) = &state.connection {
            let generation = connection.generation;
            let provider = connection.provider.clone();
            let task =
                attach_task::run(&self.shared, &provider, &subscription, generation).await?;
            if let Some(connection) = state.connection.as_mut() {
                connection.tasks.push(task);
            }
        }

        state.subscriptions.push(subscription);
        Ok(())
    }

    /// Convenience: register a filter and get the receiving half back.
    pub async fn subscribe(&self, filter: Filter) -> Result<mpsc::UnboundedReceiver<Log>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_subscription(filter, tx).await?;
        Ok(rx)
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.state.lock().await.connection.is_some()
    }

    pub async fn subscription_count(&self) -> usize {
        self.shared.state.lock().await.subscriptions.len()
    }

    /// Disable reconnection, detach all handlers and close the transport.
    pub async fn destroy(&self) {
        let mut state = self.shared.state.lock().await;
        state.should_reconnect = false;
        state.subscriptions.clear();
        if let Some(connection) = state.connection.take() {
            for task in connection.tasks {
                task.abort();
            }
            self.shared.pool.mark_push_connected(false);
        }
    }
}

impl PushShared {
    async fn ws_provider(pool: &Arc<RpcPool>) -> Result<DynProvider> {
        let endpoint = pool.current_push_endpoint().to_string();
        let connect = ProviderBuilder::new().connect_ws(WsConnect::new(endpoint.clone()));
        let provider = tokio::time::timeout(SUBSCRIBE_TIMEOUT, connect)
            .await
            .map_err(|_| MonitorError::rpc(endpoint.as_str(), "WSS connect timed out"))?
            .map_err(|e| MonitorError::rpc(endpoint.as_str(), e))?;
        Ok(provider.erased())
    }

}

/// The reconnect/attach machinery: building a transport, replaying
/// subscriptions against it, and re-scheduling on transport loss.
///
/// Kept as free functions in their own module (rather than `impl
/// PushShared` methods) so the compiler can resolve the `Send`-ness of the
/// spawned futures' hidden opaque types without the defining-scope cycle
/// that otherwise arises from these mutually-recursive async calls.
mod attach_task {
    use super::{
        Connection, DynProvider, JoinHandle, LogSubscription, MonitorError, PushShared, Result,
        StreamExt, SUBSCRIBE_TIMEOUT,
    };
    use alloy::providers::Provider;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    /// Build a transport, replay every registered subscription against it,
    /// and store the connection. Resets the reconnect delay on success.
    pub(super) async fn establish(shared: &Arc<PushShared>) -> Result<()> {
        let provider = PushShared::ws_provider(&shared.pool).await?;

        let mut state = shared.state.lock().await;
        if !state.should_reconnect {
            return Err(MonitorError::Generic("push client destroyed".into()));
        }
        if state.connection.is_some() {
            // A concurrent connect won the race; keep its transport.
            return Ok(());
        }

        state.generation += 1;
        let generation = state.generation;

        let mut tasks = Vec::with_capacity(state.subscriptions.len());
        for subscription in &state.subscriptions {
            tasks.push(run(shared, &provider, subscription, generation).await?);
        }

        state.connection = Some(Connection {
            generation,
            provider,
            tasks,
        });
        state.reconnect.reset();
        shared.pool.mark_push_connected(true);
        tracing::info!(
            endpoint = shared.pool.current_push_endpoint(),
            subscriptions = state.subscriptions.len(),
            "Push connection established"
        );
        Ok(())
    }

    /// Attach one subscription to the transport and spawn the forwarding
    /// task. The task reports transport loss tagged with its generation, so
    /// stragglers from an already-replaced connection are ignored.
    pub(super) fn run<'a>(
        shared: &'a Arc<PushShared>,
        provider: &'a DynProvider,
        subscription: &'a LogSubscription,
        generation: u64,
    ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>>> + Send + 'a>> {
        Box::pin(async move {
            let endpoint = shared.pool.current_push_endpoint().to_string();
            let subscribed = tokio::time::timeout(
                SUBSCRIBE_TIMEOUT,
                provider.subscribe_logs(&subscription.filter),
            )
            .await
            .map_err(|_| MonitorError::rpc(endpoint.as_str(), "subscription setup timed out"))?
            .map_err(|e| MonitorError::rpc(endpoint.as_str(), e))?;

            let sender = subscription.sender.clone();
            let shared = shared.clone();
            Ok(tokio::spawn(async move {
                let mut stream = subscribed.into_stream();
                while let Some(log) = stream.next().await {
                    if sender.send(log).is_err() {
                        // Receiver dropped: the owning monitor is gone.
                        return;
                    }
                }
                on_transport_closed(&shared, generation).await;
            }))
        })
    }

    async fn on_transport_closed(shared: &Arc<PushShared>, generation: u64) {
        let delay = {
            let mut state = shared.state.lock().await;
            let current = state.connection.as_ref().map(|c| c.generation);
            if current != Some(generation) {
                return; // stale task from a replaced connection
            }
            if let Some(connection) = state.connection.take() {
                for task in connection.tasks {
                    task.abort();
                }
            }
            shared.pool.mark_push_connected(false);
            if !state.should_reconnect {
                return;
            }
            state.reconnect.next()
        };

        tracing::warn!(delay_ms = delay.as_millis() as u64, "Push transport lost, reconnecting");
        let shared = shared.clone();
        tokio::spawn(async move {
            reconnect_loop(shared, delay).await;
        });
    }

    async fn reconnect_loop(shared: Arc<PushShared>, first_delay: Duration) {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;
            {
                let state = shared.state.lock().await;
                if !state.should_reconnect || state.connection.is_some() {
                    return;
                }
            }
            match establish(&shared).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Push reconnect attempt failed");
                    shared.pool.rotate_push();
                    let mut state = shared.state.lock().await;
                    if !state.should_reconnect {
                        return;
                    }
                    delay = state.reconnect.next();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<RpcPool> {
        Arc::new(
            RpcPool::new(
                vec!["http://localhost:1".to_string()],
                vec!["ws://localhost:1".to_string()],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_subscriptions_register_while_disconnected() {
        let client = PushClient::new(pool());
        let (tx, _rx) = mpsc::unbounded_channel();
        client
            .add_subscription(Filter::new(), tx)
            .await
            .expect("registration must not require a live transport");
        assert_eq!(client.subscription_count().await, 1);
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_destroy_disables_connect() {
        let client = PushClient::new(pool());
        client.destroy().await;
        assert!(client.connect().await.is_err());
        assert_eq!(client.subscription_count().await, 0);
    }
}
