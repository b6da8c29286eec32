//! Chat transports and their lifecycle.
//!
//! A channel turns what a user types into [`InboundMessage`](crate::events::InboundMessage)s
//! on the bus and delivers the [`OutboundMessage`]s routed to its name:
//! text replies, generated documents, or both.

use crate::bus::MessageBus;
use crate::error::ChannelResult;
use crate::events::OutboundMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not started, or fully stopped.
    #[default]
    Stopped,
    /// `start` is in progress.
    Starting,
    /// Accepting input and delivering replies.
    Running,
    /// `stop` is in progress.
    Stopping,
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    /// Channel name.
    pub name: String,
    /// Lifecycle state.
    pub state: ChannelState,
    /// User messages forwarded to the router.
    pub received: u64,
    /// Text replies delivered.
    pub replies: u64,
    /// Documents delivered.
    pub documents: u64,
    /// Most recent delivery or transport failure.
    pub last_error: Option<String>,
}

impl ChannelStatus {
    /// Running and no failure recorded.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.state == ChannelState::Running && self.last_error.is_none()
    }
}

/// A chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Name replies are routed by.
    fn name(&self) -> &str;

    /// Connect, attach to `bus.attach(self.name())` for replies, and start
    /// forwarding user input to `bus.inbox()`.
    async fn start(&self, bus: &MessageBus) -> ChannelResult<()>;

    /// Disconnect and stop background tasks.
    async fn stop(&self) -> ChannelResult<()>;

    /// Current status.
    async fn status(&self) -> ChannelStatus;

    /// Whether the channel is in [`ChannelState::Running`].
    async fn is_running(&self) -> bool {
        self.status().await.state == ChannelState::Running
    }
}

/// Starts, stops and reports on the configured channels.
pub struct ChannelManager {
    bus: MessageBus,
    channels: RwLock<Vec<Arc<dyn Channel>>>,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl ChannelManager {
    /// Create a manager whose channels run on `bus`.
    #[must_use]
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            channels: RwLock::new(Vec::new()),
        }
    }

    /// Add a channel. It is started by the next [`start_all`](Self::start_all).
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        debug!(channel = %channel.name(), "channel registered");
        self.channels.write().await.push(channel);
    }

    /// Whether no channel is registered.
    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Start every channel and return how many came up.
    ///
    /// A channel that fails to start is logged and skipped.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for channel in self.channels.read().await.iter() {
            match channel.start(&self.bus).await {
                Ok(()) => {
                    info!(channel = %channel.name(), "channel up");
                    started += 1;
                }
                Err(e) => warn!(channel = %channel.name(), error = %e, "channel did not start"),
            }
        }
        started
    }

    /// Stop every channel, logging failures.
    pub async fn stop_all(&self) {
        for channel in self.channels.read().await.iter() {
            if let Err(e) = channel.stop().await {
                warn!(channel = %channel.name(), error = %e, "channel did not stop cleanly");
            }
        }
    }

    /// Status of every channel, in registration order.
    pub async fn statuses(&self) -> Vec<ChannelStatus> {
        let channels = self.channels.read().await;
        let mut statuses = Vec::with_capacity(channels.len());
        for channel in channels.iter() {
            statuses.push(channel.status().await);
        }
        statuses
    }
}

/// Lifecycle state and delivery counters shared by channel implementations.
///
/// Counters are atomics so output tasks can update them without locking.
pub struct ChannelBase {
    name: String,
    state: watch::Sender<ChannelState>,
    received: AtomicU64,
    replies: AtomicU64,
    documents: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl std::fmt::Debug for ChannelBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBase")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ChannelBase {
    /// Create a stopped channel base.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: watch::Sender::new(ChannelState::Stopped),
            received: AtomicU64::new(0),
            replies: AtomicU64::new(0),
            documents: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Move to `state`.
    pub fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(channel = %self.name, from = ?previous, to = ?state, "channel state");
        }
    }

    /// Count a user message forwarded to the router.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delivered reply.
    pub fn record_sent(&self, msg: &OutboundMessage) {
        if !msg.content.is_empty() {
            self.replies.fetch_add(1, Ordering::Relaxed);
        }
        if msg.has_document() {
            self.documents.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remember a failure. It stays in the status until the next one.
    pub fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        warn!(channel = %self.name, %error, "channel failure");
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Snapshot the state and counters.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            name: self.name.clone(),
            state: self.state(),
            received: self.received.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            documents: self.documents.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Restricts who may talk to the bot. Empty lists admit everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Allowlist {
    /// Sender IDs allowed to use the bot.
    pub senders: Vec<String>,
    /// Chat IDs the bot answers in.
    pub chats: Vec<String>,
}

impl Allowlist {
    /// An allowlist that admits everyone.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Admit `sender`.
    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.senders.push(sender.into());
        self
    }

    /// Admit messages in `chat`.
    #[must_use]
    pub fn chat(mut self, chat: impl Into<String>) -> Self {
        self.chats.push(chat.into());
        self
    }

    /// Whether `sender` writing in `chat` gets an answer.
    #[must_use]
    pub fn permits(&self, sender: &str, chat: &str) -> bool {
        let listed = |list: &[String], id: &str| list.is_empty() || list.iter().any(|v| v == id);
        listed(&self.senders, sender) && listed(&self.chats, chat)
    }
}
