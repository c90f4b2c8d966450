//! Request correlation and per-request timeouts.
//!
//! Every outbound request gets a transaction id that is unique for the
//! lifetime of one channel instance (channel-local salt plus a monotonic
//! counter). The correlator tracks the in-flight request, arms its timeout,
//! and settles the caller's [`ResponseHandle`] exactly once: matching reply,
//! timeout, or channel close - whichever the loop processes first wins and
//! the others become no-ops.
//!
//! # Example
//!
//! ```ignore
//! let correlator = RequestCorrelator::new();
//! let (id, handle) = correlator.register("info", Duration::from_secs(30));
//! // ... transmit the request carrying `id` ...
//! let reply = handle.await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{AdminError, Result};
use crate::protocol::Reply;

/// An in-flight request awaiting its reply.
struct PendingRequest {
    /// Settles the caller's handle; consumed exactly once.
    tx: oneshot::Sender<Result<Reply>>,
    /// Timer task, aborted when the request settles by another path.
    timer: JoinHandle<()>,
    /// Command name, kept for diagnostics.
    command: String,
    /// When the request was registered.
    sent_at: Instant,
}

/// Table of in-flight requests, shared between the channel's send path,
/// its read loop, and the timer tasks.
#[derive(Default)]
struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

/// Generates transaction ids and tracks in-flight requests for one channel
/// instance.
///
/// Cheaply cloneable; all clones share the same pending table.
#[derive(Clone)]
pub struct RequestCorrelator {
    table: Arc<PendingTable>,
    /// Channel-local salt; global uniqueness across channels is not needed.
    salt: String,
    next: Arc<AtomicU64>,
}

impl RequestCorrelator {
    /// Create a correlator with a fresh channel-local salt.
    pub fn new() -> Self {
        Self {
            table: Arc::new(PendingTable::default()),
            salt: format!("{:x}", salt_seed()),
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate the next transaction id.
    pub fn next_transaction(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.salt, n)
    }

    /// Register an in-flight request and arm its timeout.
    ///
    /// Returns the transaction id to inject into the payload and the handle
    /// the caller awaits. The timer fires on the runtime's own turns; a
    /// reply racing the deadline settles in favor of whichever removes the
    /// entry first.
    pub fn register(&self, command: &str, timeout: Duration) -> (String, ResponseHandle) {
        let id = self.next_transaction();
        let (tx, rx) = oneshot::channel();

        let table = self.table.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pending) = table.entries.lock().unwrap().remove(&timer_id) {
                tracing::debug!(
                    transaction = %timer_id,
                    command = %pending.command,
                    elapsed = ?pending.sent_at.elapsed(),
                    "request timed out"
                );
                let _ = pending.tx.send(Err(AdminError::Timeout(timeout)));
            }
        });

        self.table.entries.lock().unwrap().insert(
            id.clone(),
            PendingRequest {
                tx,
                timer,
                command: command.to_string(),
                sent_at: Instant::now(),
            },
        );

        (id, ResponseHandle { rx })
    }

    /// Route an inbound reply to its pending request.
    ///
    /// An unknown transaction id is a silent no-op (late or duplicate
    /// delivery). A reply whose outcome discriminator signals failure
    /// rejects the handle with the remote code and reason.
    pub fn resolve(&self, reply: Reply) {
        let pending = self.table.entries.lock().unwrap().remove(&reply.transaction);
        let Some(pending) = pending else {
            tracing::debug!(transaction = %reply.transaction, "reply for unknown transaction, ignoring");
            return;
        };
        pending.timer.abort();

        let outcome = match reply.fault() {
            Some(fault) => Err(AdminError::Remote {
                code: fault.code,
                reason: fault.reason,
            }),
            None => Ok(reply),
        };
        let _ = pending.tx.send(outcome);
    }

    /// Reject a single pending request (e.g. its transmission failed).
    pub fn fail(&self, transaction: &str, err: AdminError) {
        if let Some(pending) = self.table.entries.lock().unwrap().remove(transaction) {
            pending.timer.abort();
            let _ = pending.tx.send(Err(err));
        }
    }

    /// Reject every outstanding request with [`AdminError::Closed`] and
    /// cancel all timers. Used by `disconnect`.
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut entries = self.table.entries.lock().unwrap();
            entries.drain().collect()
        };
        for (_, pending) in drained {
            pending.timer.abort();
            let _ = pending.tx.send(Err(AdminError::Closed));
        }
    }

    /// Number of requests currently in flight.
    pub fn pending_count(&self) -> usize {
        self.table.entries.lock().unwrap().len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Seed for the channel-local salt: wall-clock nanos mixed with the pid.
fn salt_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid
}

/// Completion handle returned by `send`.
///
/// Settles exactly once with the reply, or with one of the typed errors:
/// [`AdminError::Timeout`], [`AdminError::Remote`], [`AdminError::Closed`],
/// or [`AdminError::ConnectionFailed`].
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Result<Reply>>,
}

impl ResponseHandle {
    /// A handle that is already settled; used when `send` fails before the
    /// request ever reaches the wire.
    pub(crate) fn rejected(err: AdminError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

impl Future for ResponseHandle {
    type Output = Result<Reply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without settling: the channel is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(AdminError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use serde_json::json;

    fn reply_from(value: serde_json::Value) -> Reply {
        match Message::from_value(value) {
            Message::Reply(reply) => reply,
            Message::Event(_) => panic!("expected reply"),
        }
    }

    #[test]
    fn test_transaction_ids_unique_and_monotonic() {
        let correlator = RequestCorrelator::new();
        let a = correlator.next_transaction();
        let b = correlator.next_transaction();

        assert_ne!(a, b);
        assert!(a.contains('-'));
        assert_eq!(a.split('-').next(), b.split('-').next());
    }

    #[tokio::test]
    async fn test_reply_resolves_handle_once() {
        let correlator = RequestCorrelator::new();
        let (id, handle) = correlator.register("info", Duration::from_secs(5));

        correlator.resolve(reply_from(json!({
            "transaction": id,
            "ok": true,
            "result": {"name": "X"}
        })));

        let reply = handle.await.unwrap();
        assert_eq!(reply.result(), Some(&json!({"name": "X"})));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_rejects_handle() {
        let correlator = RequestCorrelator::new();
        let (id, handle) = correlator.register("info", Duration::from_secs(5));

        correlator.resolve(reply_from(json!({
            "transaction": id,
            "ok": false,
            "error": {"code": 403, "reason": "unauthorized"}
        })));

        match handle.await {
            Err(AdminError::Remote { code, reason }) => {
                assert_eq!(code, 403);
                assert_eq!(reason, "unauthorized");
            }
            other => panic!("expected remote error, got {:?}", other.map(|r| r.body)),
        }
    }

    #[tokio::test]
    async fn test_timeout_rejects_handle() {
        let correlator = RequestCorrelator::new();
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let (_id, handle) = correlator.register("info", timeout);

        match handle.await {
            Err(AdminError::Timeout(d)) => assert_eq!(d, timeout),
            other => panic!("expected timeout, got {:?}", other.map(|r| r.body)),
        }
        assert!(started.elapsed() >= timeout);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_beats_timer() {
        let correlator = RequestCorrelator::new();
        let (id, handle) = correlator.register("info", Duration::from_millis(50));

        correlator.resolve(reply_from(json!({"transaction": id, "ok": true})));
        let reply = handle.await.unwrap();
        assert!(reply.is_ok());

        // Give the aborted timer a chance to misbehave if it were going to.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_reply_is_ignored() {
        let correlator = RequestCorrelator::new();
        let (id, handle) = correlator.register("info", Duration::from_secs(5));
        let (other_id, other_handle) = correlator.register("info", Duration::from_secs(5));

        correlator.resolve(reply_from(json!({"transaction": id.clone(), "ok": true})));
        // Duplicate and late deliveries: both silently dropped.
        correlator.resolve(reply_from(json!({"transaction": id.clone(), "ok": false})));
        correlator.resolve(reply_from(json!({"transaction": "never-sent", "ok": true})));

        assert!(handle.await.is_ok());

        // The unrelated request is unaffected.
        assert_eq!(correlator.pending_count(), 1);
        correlator.resolve(reply_from(json!({"transaction": other_id, "ok": true})));
        assert!(other_handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_close_all_rejects_everything() {
        let correlator = RequestCorrelator::new();
        let (_a, handle_a) = correlator.register("info", Duration::from_secs(5));
        let (_b, handle_b) = correlator.register("list_sessions", Duration::from_secs(5));

        correlator.close_all();

        assert!(matches!(handle_a.await, Err(AdminError::Closed)));
        assert!(matches!(handle_b.await, Err(AdminError::Closed)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_rejects_single_entry() {
        let correlator = RequestCorrelator::new();
        let (id, handle) = correlator.register("info", Duration::from_secs(5));
        let (_other, other_handle) = correlator.register("info", Duration::from_secs(5));

        correlator.fail(&id, AdminError::ConnectionFailed("post failed".into()));

        assert!(matches!(handle.await, Err(AdminError::ConnectionFailed(_))));
        assert_eq!(correlator.pending_count(), 1);
        drop(other_handle);
    }

    #[tokio::test]
    async fn test_rejected_handle_settles_immediately() {
        let handle = ResponseHandle::rejected(AdminError::ConnectionFailed("not connected".into()));
        assert!(matches!(handle.await, Err(AdminError::ConnectionFailed(_))));
    }
}
