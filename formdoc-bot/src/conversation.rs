//! Conversation router: turns inbound chat messages into questionnaire steps.
//!
//! Messages are consumed from the bus in arrival order and each state
//! machine step runs inline. Replies leave through one lane per channel,
//! so a channel that stops draining its queue only delays its own chats.
//! Document generation is spawned so a slow render or conversion never
//! holds up other chats.

use crate::bus::MessageBus;
use crate::error::{BusError, Result};
use crate::events::{DocumentAttachment, InboundMessage, MessageFormat, OutboundMessage};
use formdoc::document::DocumentPipeline;
use formdoc::session::{Answers, Outcome, SessionRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reply to text sent outside a questionnaire.
pub const START_HINT: &str = "There is no questionnaire in progress. Send /start to begin.";
/// Reply to a successful /cancel.
pub const CANCELLED: &str = "Cancelled. Send /start if you want to begin again.";
/// Reply to /cancel outside a questionnaire.
pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel. Send /start to begin.";
/// Sent once the last answer is in.
pub const GENERATING: &str = "Great, generating the document...";
/// Sent when the template could not be rendered.
pub const RENDER_FAILED: &str =
    "Sorry, the document could not be generated. Send /start to try again.";
/// Usage text for /help and unknown commands.
pub const HELP: &str = "/start - begin the questionnaire\n\
/cancel - stop the current questionnaire\n\
/help - show this message";

/// What an inbound message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `/start`
    Start,
    /// `/cancel`
    Cancel,
    /// `/help`
    Help,
    /// Any other slash command, without the slash.
    Unknown(String),
    /// An answer.
    Text(String),
}

impl InboundEvent {
    /// Classify raw message text.
    ///
    /// Commands may carry a `@botname` suffix, as Telegram sends in groups.
    #[must_use]
    pub fn classify(content: &str) -> Self {
        let trimmed = content.trim();
        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Text(content.to_string());
        };

        let word = command.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default().to_lowercase();
        match name.as_str() {
            "start" => Self::Start,
            "cancel" => Self::Cancel,
            "help" => Self::Help,
            _ => Self::Unknown(name),
        }
    }
}

/// Reply lanes keyed by channel name.
///
/// Each lane is drained by its own task that waits on
/// [`MessageBus::deliver`]. Posting never waits for the channel, and
/// replies to one channel keep their order.
#[derive(Debug, Clone)]
struct Outbox {
    bus: MessageBus,
    lanes: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<OutboundMessage>>>>,
}

impl Outbox {
    fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn post(&self, msg: OutboundMessage) {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes
            .entry(msg.channel.clone())
            .or_insert_with_key(|channel| open_lane(&self.bus, channel));

        if let Err(mpsc::error::SendError(msg)) = lane.send(msg) {
            warn!(channel = %msg.channel, "reply lane closed, reopening");
            let lane = open_lane(&self.bus, &msg.channel);
            let channel = msg.channel.clone();
            let _ = lane.send(msg);
            lanes.insert(channel, lane);
        }
    }
}

fn open_lane(bus: &MessageBus, channel: &str) -> mpsc::UnboundedSender<OutboundMessage> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let bus = bus.clone();
    let channel = channel.to_string();

    tokio::spawn(async move {
        debug!(%channel, "reply lane opened");
        while let Some(msg) = rx.recv().await {
            let chat_id = msg.chat_id.clone();
            if let Err(e) = bus.deliver(msg).await {
                debug!(%channel, %chat_id, error = %e, "reply dropped");
            }
        }
        debug!(%channel, "reply lane closed");
    });

    tx
}

/// Drives questionnaire sessions from bus messages.
#[derive(Debug)]
pub struct ConversationRouter {
    bus: MessageBus,
    outbox: Outbox,
    registry: Arc<SessionRegistry>,
    pipeline: Arc<DocumentPipeline>,
    shutdown: watch::Sender<bool>,
}

impl ConversationRouter {
    /// Create a router.
    #[must_use]
    pub fn new(
        bus: MessageBus,
        registry: Arc<SessionRegistry>,
        pipeline: Arc<DocumentPipeline>,
    ) -> Self {
        Self {
            outbox: Outbox::new(bus.clone()),
            bus,
            registry,
            pipeline,
            shutdown: watch::Sender::new(false),
        }
    }

    /// The session registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Consume inbound messages until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InboundClosed`] if the bus stops delivering messages.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }
        info!("conversation router started");

        loop {
            tokio::select! {
                msg = self.bus.next_inbound() => {
                    let Some(msg) = msg else {
                        error!("inbound bus closed");
                        return Err(BusError::InboundClosed.into());
                    };
                    self.handle(&msg).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("conversation router stopped");
        Ok(())
    }

    /// Ask [`run`](Self::run) to return.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Apply one inbound message.
    ///
    /// Replies are queued for their channel and sent in the background.
    /// Returns the generation task when this message completed a session.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<JoinHandle<()>> {
        let key = msg.session_key();
        let event = InboundEvent::classify(&msg.content);
        debug!(session = %key, ?event, "inbound event");

        match event {
            InboundEvent::Start => {
                let prompt = self.registry.begin(&key).await;
                self.reply(msg, self.registry.script().greeting(), MessageFormat::Plain)
                    .await;
                self.reply(msg, &prompt, MessageFormat::Markdown).await;
            }
            InboundEvent::Cancel => {
                let text = match self.registry.cancel(&key).await {
                    Outcome::Cancelled => CANCELLED,
                    _ => NOTHING_TO_CANCEL,
                };
                self.reply(msg, text, MessageFormat::Plain).await;
            }
            InboundEvent::Help | InboundEvent::Unknown(_) => {
                let text = match self.registry.progress(&key).await {
                    Some(progress) => format!(
                        "{HELP}\n\nYou are on question {} of {}.",
                        progress.answered + 1,
                        progress.total
                    ),
                    None => HELP.to_string(),
                };
                self.reply(msg, &text, MessageFormat::Plain).await;
            }
            InboundEvent::Text(text) => match self.registry.submit_answer(&key, &text).await {
                Outcome::NextPrompt(prompt) => {
                    self.reply(msg, &prompt, MessageFormat::Markdown).await;
                }
                Outcome::ReadyToGenerate(answers) => {
                    self.reply(msg, GENERATING, MessageFormat::Plain).await;
                    return Some(self.spawn_generation(msg.clone(), answers));
                }
                Outcome::NoActiveSession | Outcome::Cancelled => {
                    self.reply(msg, START_HINT, MessageFormat::Plain).await;
                }
            },
        }

        None
    }

    async fn reply(&self, msg: &InboundMessage, text: &str, format: MessageFormat) {
        let reply = OutboundMessage::reply_to(msg, text).with_format(format);
        self.outbox.post(reply).await;
    }

    fn spawn_generation(&self, msg: InboundMessage, answers: Answers) -> JoinHandle<()> {
        let outbox = self.outbox.clone();
        let pipeline = Arc::clone(&self.pipeline);

        tokio::spawn(async move {
            let replies = match pipeline.generate(&answers).await {
                Ok(plan) => {
                    let document = DocumentAttachment {
                        file_name: plan.filename,
                        bytes: plan.bytes,
                        caption: None,
                    };
                    let mut replies = vec![OutboundMessage::document_to(&msg, document)];
                    if let Some(note) = plan.note {
                        replies.push(OutboundMessage::reply_to(&msg, note));
                    }
                    replies
                }
                Err(e) => {
                    error!(session = %msg.session_key(), error = %e, "document generation failed");
                    vec![OutboundMessage::reply_to(&msg, RENDER_FAILED)]
                }
            };

            for reply in replies {
                outbox.post(reply).await;
            }
        })
    }
}
