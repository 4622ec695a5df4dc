//! Local permission broker
//!
//! A loopback-only HTTP service on an OS-assigned port. The agent's
//! PreToolUse hook posts a request and blocks on the response; the broker
//! hands the request to a [`PermissionNotifier`] and waits for someone to call
//! [`PermissionBroker::resolve`], or for the timeout, whichever comes first.
//!
//! Pending requests live in a `DashMap` keyed by request ID. Removing the
//! entry is the commit point: whoever removes it (a resolution, the timeout,
//! or shutdown) decides the outcome, and every later attempt is a no-op.
//! A caller that goes away (the hook's connection drops) takes its entry
//! with it.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::request::{Decision, PermissionBody, PermissionRequest, PermissionResponse};

/// Default time a hook request waits for a decision
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Receives permission requests and arranges for a decision.
///
/// Called exactly once per valid request. Implementations should return
/// promptly and call [`PermissionBroker::resolve`] later (for example from a
/// button handler); the request is denied if nobody resolves it in time.
pub trait PermissionNotifier: Send + Sync + 'static {
    /// Tell a decision-maker about `request`
    fn notify(
        &self,
        request: PermissionRequest,
        broker: PermissionBroker,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Notifier that forwards every request into a channel.
///
/// Useful when the decision-maker is a task that consumes requests as a
/// stream and calls `resolve` on a broker handle it already holds.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<PermissionRequest>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PermissionRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PermissionNotifier for ChannelNotifier {
    fn notify(
        &self,
        request: PermissionRequest,
        _broker: PermissionBroker,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.tx
                .send(request)
                .map_err(|_| anyhow::anyhow!("permission request receiver dropped"))
        })
    }
}

/// A request waiting for its decision
#[derive(Debug)]
struct PendingPermission {
    sender: oneshot::Sender<bool>,
    received_at: Instant,
    seq: u64,
}

struct BrokerInner {
    pending: DashMap<String, PendingPermission>,
    next_seq: AtomicU64,
    notifier: Arc<dyn PermissionNotifier>,
    timeout: Duration,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

/// Handle to a running permission broker. Cheap to clone.
#[derive(Clone)]
pub struct PermissionBroker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for PermissionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionBroker")
            .field("addr", &self.inner.addr)
            .field("pending", &self.inner.pending.len())
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

/// Outcome of registering a request
enum Registration {
    Registered(Waiter),
    Duplicate,
}

/// The registered side of one request: its decision channel plus the
/// guard that clears its entry.
struct Waiter {
    receiver: oneshot::Receiver<bool>,
    cleanup: PendingCleanup,
}

/// Removes its own entry from the pending map on drop, if still there.
///
/// Matching on `seq` keeps a later request that reuses the ID untouched.
struct PendingCleanup {
    broker: PermissionBroker,
    request_id: String,
    seq: u64,
}

impl Drop for PendingCleanup {
    fn drop(&mut self) {
        let seq = self.seq;
        let removed = self
            .broker
            .inner
            .pending
            .remove_if(&self.request_id, |_, pending| pending.seq == seq);
        if removed.is_some() {
            debug!(request_id = %self.request_id, "permission request abandoned");
        }
    }
}

impl PermissionBroker {
    /// Bind `127.0.0.1:0` and start serving in the background.
    pub async fn start(notifier: Arc<dyn PermissionNotifier>, timeout: Duration) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("Failed to bind permission broker")?;
        let addr = listener
            .local_addr()
            .context("Failed to read permission broker address")?;

        let broker = Self {
            inner: Arc::new(BrokerInner {
                pending: DashMap::new(),
                next_seq: AtomicU64::new(0),
                notifier,
                timeout,
                addr,
                shutdown: CancellationToken::new(),
            }),
        };

        let app = router(broker.clone());
        let shutdown = broker.inner.shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(%err, "permission broker stopped with error");
            }
            debug!("permission broker listener closed");
        });

        info!(%addr, "permission broker started");
        Ok(broker)
    }

    /// Port the broker listens on; exported to the agent for the hook
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.addr.port()
    }

    /// Full socket address of the listener
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Number of requests awaiting a decision
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Record a human decision for `request_id`.
    ///
    /// Returns `true` if this call decided the request, `false` if the ID is
    /// unknown or was already decided (resolved, timed out, or shut down).
    pub fn resolve(&self, request_id: &str, allowed: bool) -> bool {
        let Some((_, pending)) = self.inner.pending.remove(request_id) else {
            debug!(request_id, "no pending permission request, ignoring decision");
            return false;
        };

        let waited_ms = pending.received_at.elapsed().as_millis();
        if pending.sender.send(allowed).is_err() {
            warn!(request_id, "permission waiter already gone");
        }
        info!(request_id, allowed, waited_ms, "permission resolved");
        true
    }

    /// Stop listening and deny every pending request.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let ids: Vec<String> = self
            .inner
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if let Some((_, pending)) = self.inner.pending.remove(&id) {
                if pending.sender.send(false).is_err() {
                    debug!(request_id = %id, "permission waiter already gone");
                }
                debug!(request_id = %id, "denied on shutdown");
            }
        }
        info!("permission broker shut down");
    }

    /// Whether `shutdown` has been called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn register(&self, request_id: &str) -> Registration {
        match self.inner.pending.entry(request_id.to_string()) {
            Entry::Occupied(_) => Registration::Duplicate,
            Entry::Vacant(slot) => {
                let (sender, receiver) = oneshot::channel();
                let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(PendingPermission {
                    sender,
                    received_at: Instant::now(),
                    seq,
                });
                Registration::Registered(Waiter {
                    receiver,
                    cleanup: PendingCleanup {
                        broker: self.clone(),
                        request_id: request_id.to_string(),
                        seq,
                    },
                })
            }
        }
    }

    /// Notify, then wait for a decision until the deadline.
    ///
    /// The deadline also bounds the notifier, and a decision (or shutdown)
    /// that lands while the notifier is still running ends the wait.
    async fn decide(&self, request: PermissionRequest, waiter: Waiter) -> bool {
        let Waiter {
            mut receiver,
            cleanup: _cleanup,
        } = waiter;
        let deadline = Instant::now() + self.inner.timeout;
        let request_id = request.request_id.clone();

        // Shutdown may have drained the map before this entry went in.
        if self.is_shut_down() {
            return false;
        }

        let notify = self.inner.notifier.notify(request, self.clone());
        tokio::select! {
            biased;
            decision = &mut receiver => return decision.unwrap_or(false),
            notified = tokio::time::timeout_at(deadline, notify) => match notified {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(request_id, "permission notifier failed: {err:#}"),
                Err(_) => warn!(request_id, "permission notifier still running at deadline"),
            },
        }

        match tokio::time::timeout_at(deadline, &mut receiver).await {
            Ok(Ok(allowed)) => allowed,
            Ok(Err(_)) => false,
            Err(_) => {
                if self.inner.pending.remove(&request_id).is_some() {
                    info!(request_id, "permission request timed out");
                    false
                } else {
                    // A resolution won the race against the deadline.
                    receiver.try_recv().unwrap_or(false)
                }
            }
        }
    }
}

fn router(broker: PermissionBroker) -> Router {
    Router::new()
        .route(
            "/permission",
            post(handle_permission).fallback(|| async { StatusCode::NOT_FOUND }),
        )
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(broker)
}

async fn handle_permission(State(broker): State<PermissionBroker>, body: Bytes) -> Response {
    let body: PermissionBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, "malformed permission request");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let Some(request) = PermissionRequest::from_body(body) else {
        warn!("permission request without requestId");
        return StatusCode::BAD_REQUEST.into_response();
    };

    info!(
        request_id = %request.request_id,
        user_id = %request.user_id,
        tool = %request.tool_name,
        "permission request"
    );

    let waiter = match broker.register(&request.request_id) {
        Registration::Registered(waiter) => waiter,
        Registration::Duplicate => {
            warn!(request_id = %request.request_id, "duplicate pending request id");
            return StatusCode::CONFLICT.into_response();
        }
    };

    let allowed = broker.decide(request, waiter).await;
    Json(PermissionResponse {
        decision: Decision::from(allowed),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::request::ToolInput;
    use serde_json::Value;

    fn request(id: &str) -> PermissionRequest {
        PermissionRequest {
            request_id: id.to_string(),
            user_id: "u1".to_string(),
            chat_id: "c1".to_string(),
            tool_name: "Bash".to_string(),
            tool_input: ToolInput::Other(Value::Null),
        }
    }

    async fn broker_with_channel(
        timeout: Duration,
    ) -> (PermissionBroker, mpsc::UnboundedReceiver<PermissionRequest>) {
        let (notifier, rx) = ChannelNotifier::new();
        let broker = PermissionBroker::start(Arc::new(notifier), timeout)
            .await
            .unwrap();
        (broker, rx)
    }

    async fn ask(broker: &PermissionBroker, id: &str) -> Option<bool> {
        match broker.register(id) {
            Registration::Registered(waiter) => Some(broker.decide(request(id), waiter).await),
            Registration::Duplicate => None,
        }
    }

    #[tokio::test]
    async fn test_binds_ephemeral_loopback_port() {
        let (a, _rx_a) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;
        let (b, _rx_b) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;

        assert!(a.addr().ip().is_loopback());
        assert_ne!(a.port(), 0);
        assert_ne!(a.port(), b.port());
    }

    #[tokio::test]
    async fn test_resolve_allow_before_timeout() {
        let (broker, mut rx) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { ask(&broker, "r1").await })
        };
        let notified = rx.recv().await.unwrap();
        assert_eq!(notified.request_id, "r1");
        assert!(broker.resolve("r1", true));

        assert_eq!(waiter.await.unwrap(), Some(true));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_denies_and_later_resolve_is_noop() {
        let (broker, mut rx) = broker_with_channel(Duration::from_millis(100)).await;

        let allowed = ask(&broker, "r1").await;
        assert_eq!(allowed, Some(false));
        assert!(rx.recv().await.is_some());

        assert!(!broker.resolve("r1", true));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let (broker, mut rx) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { ask(&broker, "r1").await })
        };
        rx.recv().await.unwrap();

        assert!(broker.resolve("r1", true));
        assert!(!broker.resolve("r1", false));
        assert_eq!(waiter.await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_duplicate_pending_id_is_rejected() {
        let (broker, mut rx) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { ask(&broker, "r1").await })
        };
        rx.recv().await.unwrap();

        assert!(ask(&broker, "r1").await.is_none());
        broker.resolve("r1", false);
        assert_eq!(waiter.await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_noop() {
        let (broker, _rx) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;
        assert!(!broker.resolve("never-seen", true));
    }

    #[tokio::test]
    async fn test_shutdown_denies_pending_requests() {
        let (broker, mut rx) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { ask(&broker, "r1").await })
        };
        rx.recv().await.unwrap();

        broker.shutdown();
        assert_eq!(waiter.await.unwrap(), Some(false));
        assert!(broker.is_shut_down());

        // Requests after shutdown are denied without waiting.
        assert_eq!(ask(&broker, "r2").await, Some(false));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_notifier_still_times_out_to_deny() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        let broker = PermissionBroker::start(Arc::new(notifier), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(ask(&broker, "r1").await, Some(false));
    }

    /// Notifier whose future never completes
    struct StuckNotifier;

    impl PermissionNotifier for StuckNotifier {
        fn notify(
            &self,
            _request: PermissionRequest,
            _broker: PermissionBroker,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn test_abandoned_request_is_removed() {
        let (broker, mut rx) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { ask(&broker, "r1").await })
        };
        rx.recv().await.unwrap();
        assert_eq!(broker.pending_count(), 1);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(broker.pending_count(), 0);
        assert!(!broker.resolve("r1", true));
    }

    #[tokio::test]
    async fn test_cleanup_leaves_reused_id_alone() {
        let (broker, _rx) = broker_with_channel(DEFAULT_PERMISSION_TIMEOUT).await;

        let Registration::Registered(first) = broker.register("r1") else {
            panic!("first registration rejected");
        };
        assert!(broker.resolve("r1", false));

        let Registration::Registered(_second) = broker.register("r1") else {
            panic!("reused id rejected after resolution");
        };
        drop(first);

        assert_eq!(broker.pending_count(), 1);
        assert!(broker.resolve("r1", true));
    }

    #[tokio::test]
    async fn test_stuck_notifier_is_bounded_by_timeout() {
        let broker = PermissionBroker::start(Arc::new(StuckNotifier), Duration::from_millis(100))
            .await
            .unwrap();

        let allowed = tokio::time::timeout(Duration::from_secs(2), ask(&broker, "r1"))
            .await
            .expect("request outlived its budget");

        assert_eq!(allowed, Some(false));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_decision_during_stuck_notifier_is_used() {
        let broker = PermissionBroker::start(Arc::new(StuckNotifier), DEFAULT_PERMISSION_TIMEOUT)
            .await
            .unwrap();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { ask(&broker, "r1").await })
        };
        while broker.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(broker.resolve("r1", true));

        let allowed = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(allowed, Some(true));
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_stuck_notifier() {
        let broker = PermissionBroker::start(Arc::new(StuckNotifier), DEFAULT_PERMISSION_TIMEOUT)
            .await
            .unwrap();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { ask(&broker, "r1").await })
        };
        while broker.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        broker.shutdown();

        let allowed = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(allowed, Some(false));
    }
}
