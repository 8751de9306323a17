// crates/core/src/hub.rs
//! Per-client progress channels.
//!
//! One live channel per client id. A newer subscription for the same id
//! replaces the older one, whose stream then ends once drained. Publishing
//! never blocks and never queues for absent clients. Channels are unbounded:
//! a slow reader must still see the terminal event of its job.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::event::ProgressEvent;

/// Item delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Sent once on subscribe so intermediaries flush headers.
    KeepAlive,
    Event(ProgressEvent),
}

#[derive(Debug)]
struct Channel {
    conn_id: u64,
    tx: mpsc::UnboundedSender<HubMessage>,
}

#[derive(Debug, Default)]
pub struct NotificationHub {
    channels: RwLock<HashMap<String, Channel>>,
    next_conn_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Channel>> {
        self.channels.read().unwrap_or_else(|poisoned| {
            tracing::error!("Hub RwLock poisoned on read, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Channel>> {
        self.channels.write().unwrap_or_else(|poisoned| {
            tracing::error!("Hub RwLock poisoned on write, recovering");
            poisoned.into_inner()
        })
    }

    /// Open the channel for `client_id`, displacing any previous one.
    pub fn subscribe(self: &Arc<Self>, client_id: &str) -> Subscription {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(HubMessage::KeepAlive);

        let displaced = self
            .write()
            .insert(client_id.to_string(), Channel { conn_id, tx });
        if let Some(old) = displaced {
            tracing::debug!(client_id, old_conn = old.conn_id, conn_id, "Progress channel displaced");
        } else {
            tracing::debug!(client_id, conn_id, "Progress channel opened");
        }

        Subscription {
            client_id: client_id.to_string(),
            conn_id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to `client_id` if subscribed. Returns whether the
    /// event was handed to a live channel.
    pub fn publish(&self, client_id: &str, event: ProgressEvent) -> bool {
        let channels = self.read();
        let Some(channel) = channels.get(client_id) else {
            return false;
        };
        let terminal = event.is_terminal();
        if channel.tx.send(HubMessage::Event(event)).is_err() {
            return false;
        }
        if terminal {
            tracing::debug!(client_id, conn_id = channel.conn_id, "Terminal event queued");
        }
        true
    }

    /// Drop every channel so each subscription stream ends. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let mut channels = self.write();
        let closed = channels.len();
        channels.clear();
        closed
    }

    /// Remove the channel for `client_id` regardless of which connection owns it.
    pub fn unsubscribe(&self, client_id: &str) -> bool {
        self.write().remove(client_id).is_some()
    }

    fn unsubscribe_connection(&self, client_id: &str, conn_id: u64) {
        let mut channels = self.write();
        if channels.get(client_id).is_some_and(|c| c.conn_id == conn_id) {
            channels.remove(client_id);
            tracing::debug!(client_id, conn_id, "Progress channel closed");
        }
    }

    pub fn is_subscribed(&self, client_id: &str) -> bool {
        self.read().contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.read().len()
    }
}

/// Receiving side of a client channel. Dropping it unsubscribes, unless a
/// newer connection has already taken over the client id.
#[derive(Debug)]
pub struct Subscription {
    client_id: String,
    conn_id: u64,
    rx: mpsc::UnboundedReceiver<HubMessage>,
    hub: Weak<NotificationHub>,
}

impl Subscription {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = HubMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe_connection(&self.client_id, self.conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_subscribe_sends_keep_alive_first() {
        let hub = Arc::new(NotificationHub::new());
        let mut sub = hub.subscribe("c1");
        assert_eq!(sub.recv().await, Some(HubMessage::KeepAlive));
        assert!(hub.is_subscribed("c1"));
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let hub = Arc::new(NotificationHub::new());
        let mut sub = hub.subscribe("c1");
        sub.recv().await;

        assert!(hub.publish("c1", ProgressEvent::downloading(10.0)));
        assert!(hub.publish("c1", ProgressEvent::downloading(20.0)));
        assert!(hub.publish("c1", ProgressEvent::complete()));

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(sub.recv().await.unwrap());
        }
        assert_eq!(
            got,
            vec![
                HubMessage::Event(ProgressEvent::downloading(10.0)),
                HubMessage::Event(ProgressEvent::downloading(20.0)),
                HubMessage::Event(ProgressEvent::complete()),
            ]
        );
    }

    #[test]
    fn test_publish_to_absent_client_is_noop() {
        let hub = NotificationHub::new();
        assert!(!hub.publish("nobody", ProgressEvent::complete()));
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = Arc::new(NotificationHub::new());
        let sub = hub.subscribe("c1");
        assert_eq!(hub.client_count(), 1);
        drop(sub);
        assert_eq!(hub.client_count(), 0);
        assert!(!hub.publish("c1", ProgressEvent::complete()));
    }

    #[tokio::test]
    async fn test_displaced_connection_does_not_remove_newer() {
        let hub = Arc::new(NotificationHub::new());
        let mut old = hub.subscribe("c1");
        let mut new = hub.subscribe("c1");
        assert_eq!(old.recv().await, Some(HubMessage::KeepAlive));
        assert_eq!(new.recv().await, Some(HubMessage::KeepAlive));

        // The old stream ends once its sender is replaced.
        assert_eq!(old.recv().await, None);
        drop(old);
        assert!(hub.is_subscribed("c1"));

        assert!(hub.publish("c1", ProgressEvent::downloading(5.0)));
        assert_eq!(
            new.recv().await,
            Some(HubMessage::Event(ProgressEvent::downloading(5.0)))
        );
    }

    #[tokio::test]
    async fn test_slow_reader_still_gets_terminal_event() {
        let hub = Arc::new(NotificationHub::new());
        let mut sub = hub.subscribe("c1");

        for i in 0..400 {
            assert!(hub.publish("c1", ProgressEvent::downloading(f64::from(i % 100))));
        }
        assert!(hub.publish("c1", ProgressEvent::complete()));

        assert_eq!(sub.recv().await, Some(HubMessage::KeepAlive));
        let mut progress = 0;
        let last = loop {
            match sub.recv().await {
                Some(HubMessage::Event(event)) if event.is_terminal() => break event,
                Some(HubMessage::Event(_)) => progress += 1,
                other => panic!("unexpected message: {other:?}"),
            }
        };
        assert_eq!(progress, 400);
        assert_eq!(last, ProgressEvent::complete());
    }

    #[tokio::test]
    async fn test_close_all_ends_every_subscription() {
        let hub = Arc::new(NotificationHub::new());
        let mut a = hub.subscribe("c1");
        let mut b = hub.subscribe("c2");
        assert_eq!(a.recv().await, Some(HubMessage::KeepAlive));
        assert_eq!(b.recv().await, Some(HubMessage::KeepAlive));

        assert_eq!(hub.close_all(), 2);
        assert_eq!(hub.client_count(), 0);
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
        assert!(!hub.publish("c1", ProgressEvent::complete()));
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe() {
        let hub = Arc::new(NotificationHub::new());
        let mut sub = hub.subscribe("c1");
        sub.recv().await;
        assert!(hub.unsubscribe("c1"));
        assert!(!hub.unsubscribe("c1"));
        assert_eq!(sub.recv().await, None);
    }
}
