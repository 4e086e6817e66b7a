//! Pending-request table for suspend-and-resume.
//!
//! A component that must wait for an out-of-band reply (an `ask_user` step,
//! a human gate) registers a request id and awaits the returned receiver.
//! The reply path resolves the id exactly once; resolving an id that is not
//! pending is a silent no-op, so late or duplicate replies are dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

/// Answers submitted for an `ask_user` step, keyed by question header.
pub type AnswerMap = BTreeMap<String, Value>;

pub struct PendingRequests<T> {
    // Insertion order is kept so "oldest pending" is well defined.
    inner: Arc<Mutex<Vec<(String, oneshot::Sender<T>)>>>,
}

impl<T> Clone for PendingRequests<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Send + 'static> PendingRequests<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiver its reply will arrive on.
    /// Re-registering an id replaces the previous waiter.
    pub async fn register(&self, id: &str) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.inner.lock().await;
        pending.retain(|(existing, _)| existing != id);
        pending.push((id.to_string(), tx));
        rx
    }

    /// Deliver `value` to the waiter for `id`. Returns whether one was pending.
    pub async fn resolve(&self, id: &str, value: T) -> bool {
        let sender = {
            let mut pending = self.inner.lock().await;
            let index = pending.iter().position(|(existing, _)| existing == id);
            index.map(|i| pending.remove(i).1)
        };
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::debug!("[Pending] No pending request for '{}'", id);
                false
            }
        }
    }

    /// Deliver `value` to the oldest waiter, returning its id.
    pub async fn resolve_oldest(&self, value: T) -> Option<String> {
        let entry = {
            let mut pending = self.inner.lock().await;
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        let (id, tx) = entry?;
        tx.send(value).ok().map(|_| id)
    }

    pub async fn is_pending(&self, id: &str) -> bool {
        self.inner.lock().await.iter().any(|(existing, _)| existing == id)
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub async fn cancel_all(&self) {
        self.inner.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_once() {
        let pending: PendingRequests<u32> = PendingRequests::new();
        let rx = pending.register("step-1").await;

        assert!(pending.resolve("step-1", 7).await);
        assert!(!pending.resolve("step-1", 8).await);
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unknown_id_is_noop() {
        let pending: PendingRequests<u32> = PendingRequests::new();
        assert!(!pending.resolve("nope", 1).await);
        assert!(pending.pending_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_oldest_and_cancel() {
        let pending: PendingRequests<&'static str> = PendingRequests::new();
        let first = pending.register("a").await;
        let second = pending.register("b").await;

        assert_eq!(pending.resolve_oldest("yes").await.as_deref(), Some("a"));
        assert_eq!(first.await.unwrap(), "yes");

        pending.cancel_all().await;
        assert!(second.await.is_err());
        assert!(!pending.is_pending("b").await);
    }
}
