//! Queues between chat channels and the conversation router.
//!
//! Everything users type lands in a single inbox that the router drains
//! in arrival order. Replies are routed by channel name to the queue each
//! channel attached at start-up. Observers can tap every reply as well.

use crate::error::{BusError, BusResult};
use crate::events::{InboundMessage, OutboundMessage};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tracing::{debug, trace, warn};

/// Queue depth used by [`MessageBus::new`].
pub const DEFAULT_CAPACITY: usize = 256;

const TAP_CAPACITY: usize = 64;

/// Traffic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Messages accepted into the inbox.
    pub inbound: u64,
    /// Replies handed to [`MessageBus::deliver`].
    pub outbound: u64,
    /// Replies no attached channel accepted.
    pub undelivered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    inbound: AtomicU64,
    outbound: AtomicU64,
    undelivered: AtomicU64,
}

/// Sending half of the router's inbox. Cheap to clone into channel tasks.
#[derive(Debug, Clone)]
pub struct Inbox {
    tx: mpsc::Sender<InboundMessage>,
    closed: watch::Receiver<bool>,
    counters: Arc<Counters>,
}

impl Inbox {
    /// Queue a message for the router.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InboundClosed`] once the inbox has been closed.
    pub async fn submit(&self, msg: InboundMessage) -> BusResult<()> {
        if *self.closed.borrow() {
            return Err(BusError::InboundClosed);
        }
        trace!(channel = %msg.channel, chat_id = %msg.chat_id, "inbound message queued");
        self.tx.send(msg).await.map_err(|_| BusError::InboundClosed)?;
        self.counters.inbound.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Shared handle to the bus.
#[derive(Clone)]
pub struct MessageBus {
    shared: Arc<Shared>,
}

struct Shared {
    inbox: Inbox,
    drain: Mutex<mpsc::Receiver<InboundMessage>>,
    close: watch::Sender<bool>,
    routes: RwLock<HashMap<String, Vec<mpsc::Sender<OutboundMessage>>>>,
    tap: broadcast::Sender<OutboundMessage>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Create a bus with [`DEFAULT_CAPACITY`] queues.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose inbox and per-channel queues hold `capacity` messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (close, closed) = watch::channel(false);
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        let counters = Arc::new(Counters::default());

        Self {
            shared: Arc::new(Shared {
                inbox: Inbox {
                    tx,
                    closed,
                    counters: Arc::clone(&counters),
                },
                drain: Mutex::new(rx),
                close,
                routes: RwLock::new(HashMap::new()),
                tap,
                counters,
                capacity,
            }),
        }
    }

    /// A handle channels use to queue user input.
    #[must_use]
    pub fn inbox(&self) -> Inbox {
        self.shared.inbox.clone()
    }

    /// Queue a message for the router.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InboundClosed`] once the inbox has been closed.
    pub async fn submit(&self, msg: InboundMessage) -> BusResult<()> {
        self.shared.inbox.submit(msg).await
    }

    /// Wait for the next inbound message.
    ///
    /// After [`close_inbound`](Self::close_inbound) the messages already
    /// queued are still returned, then `None`.
    pub async fn next_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.shared.drain.lock().await;
        let mut closed = self.shared.close.subscribe();

        tokio::select! {
            biased;
            msg = rx.recv() => msg,
            () = async { let _ = closed.wait_for(|closed| *closed).await; } => rx.try_recv().ok(),
        }
    }

    /// Refuse further inbound messages.
    pub fn close_inbound(&self) {
        self.shared.close.send_replace(true);
        debug!("inbox closed");
    }

    /// Attach a delivery queue for `channel`.
    pub async fn attach(&self, channel: &str) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        self.shared
            .routes
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        debug!(channel, "delivery queue attached");
        rx
    }

    /// Receive a copy of every reply, whichever channel it is for.
    #[must_use]
    pub fn observe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.shared.tap.subscribe()
    }

    /// Route a reply to the channel it names.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ChannelNotFound`] if no queue for that channel
    /// accepted the message.
    pub async fn deliver(&self, msg: OutboundMessage) -> BusResult<()> {
        trace!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            document = msg.has_document(),
            "delivering reply"
        );
        self.shared.counters.outbound.fetch_add(1, Ordering::Relaxed);
        let _ = self.shared.tap.send(msg.clone());

        let queues: Vec<_> = self
            .shared
            .routes
            .read()
            .await
            .get(&msg.channel)
            .cloned()
            .unwrap_or_default();

        let mut accepted = 0usize;
        for queue in &queues {
            if queue.send(msg.clone()).await.is_ok() {
                accepted += 1;
            }
        }

        if accepted < queues.len() {
            self.prune(&msg.channel).await;
        }
        if accepted == 0 {
            self.shared.counters.undelivered.fetch_add(1, Ordering::Relaxed);
            warn!(channel = %msg.channel, chat_id = %msg.chat_id, "reply not delivered");
            return Err(BusError::ChannelNotFound(msg.channel));
        }
        Ok(())
    }

    async fn prune(&self, channel: &str) {
        let mut routes = self.shared.routes.write().await;
        if let Some(queues) = routes.get_mut(channel) {
            queues.retain(|q| !q.is_closed());
            if queues.is_empty() {
                routes.remove(channel);
            }
        }
    }

    /// Current traffic counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let counters = &self.shared.counters;
        BusStats {
            inbound: counters.inbound.load(Ordering::Relaxed),
            outbound: counters.outbound.load(Ordering::Relaxed),
            undelivered: counters.undelivered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv(rx: &mut mpsc::Receiver<OutboundMessage>) -> OutboundMessage {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_inbox_preserves_order() {
        let bus = MessageBus::new();
        let inbox = bus.inbox();

        inbox.submit(InboundMessage::cli("c", "first")).await.unwrap();
        bus.submit(InboundMessage::cli("c", "second")).await.unwrap();

        assert_eq!(bus.next_inbound().await.unwrap().content, "first");
        assert_eq!(bus.next_inbound().await.unwrap().content, "second");
        assert_eq!(bus.stats().inbound, 2);
    }

    #[tokio::test]
    async fn test_close_drains_pending() {
        let bus = MessageBus::new();
        bus.submit(InboundMessage::cli("c", "pending")).await.unwrap();
        bus.close_inbound();

        assert!(matches!(
            bus.submit(InboundMessage::cli("c", "late")).await,
            Err(BusError::InboundClosed)
        ));
        assert_eq!(bus.next_inbound().await.unwrap().content, "pending");
        assert!(bus.next_inbound().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let bus = MessageBus::new();
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.next_inbound().await })
        };

        tokio::task::yield_now().await;
        bus.close_inbound();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_routing_by_channel() {
        let bus = MessageBus::new();
        let mut telegram = bus.attach("telegram").await;
        let mut cli = bus.attach("cli").await;

        bus.deliver(OutboundMessage::new("telegram", "1", "for telegram"))
            .await
            .unwrap();
        bus.deliver(OutboundMessage::new("cli", "direct", "for cli"))
            .await
            .unwrap();

        assert_eq!(recv(&mut telegram).await.content, "for telegram");
        assert_eq!(recv(&mut cli).await.content, "for cli");
        assert!(telegram.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undelivered_reply() {
        let bus = MessageBus::new();
        let err = bus
            .deliver(OutboundMessage::new("nowhere", "1", "lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ChannelNotFound(name) if name == "nowhere"));

        let dropped = bus.attach("gone").await;
        drop(dropped);
        assert!(bus.deliver(OutboundMessage::new("gone", "1", "x")).await.is_err());

        assert_eq!(
            bus.stats(),
            BusStats {
                inbound: 0,
                outbound: 2,
                undelivered: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_observe_sees_every_reply() {
        let bus = MessageBus::new();
        let mut tap = bus.observe();
        let _cli = bus.attach("cli").await;

        bus.deliver(OutboundMessage::new("cli", "direct", "hello"))
            .await
            .unwrap();
        let _ = bus.deliver(OutboundMessage::new("nowhere", "1", "lost")).await;

        assert_eq!(tap.recv().await.unwrap().content, "hello");
        assert_eq!(tap.recv().await.unwrap().content, "lost");
    }
}
