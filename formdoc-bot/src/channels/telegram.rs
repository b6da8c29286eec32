//! Telegram transport built on teloxide.
//!
//! Replies go out as HTML. Prompts written in Markdown are converted
//! first, everything else is escaped. Documents are uploaded straight
//! from memory.
//!
//! # Setup
//!
//! 1. Create a bot via [@BotFather](https://t.me/botfather)
//! 2. Put the token in the config file or `TELEGRAM_BOT_TOKEN`

use crate::bus::{Inbox, MessageBus};
use crate::channel::{Allowlist, Channel, ChannelBase, ChannelState, ChannelStatus};
use crate::error::{ChannelError, ChannelResult};
use crate::events::{InboundMessage, MessageFormat, OutboundMessage};
use crate::util::split_into_chunks;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Name replies for Telegram are routed by.
pub const TELEGRAM_CHANNEL: &str = "telegram";

/// Longest text Telegram accepts in one message.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Markdown constructs understood in prompts, applied in order to
/// already-escaped text. Bold runs before italics so `**` is never read
/// as two single asterisks.
static MARKDOWN_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"`([^`]+)`", "<code>$1</code>"),
        (r"\*\*(.+?)\*\*", "<b>$1</b>"),
        (r"__(.+?)__", "<b>$1</b>"),
        (r"(^|[^*\w])\*([^*\n]+)\*", "$1<i>$2</i>"),
        (r"\[([^\]]+)\]\(([^)]+)\)", r#"<a href="$2">$1</a>"#),
    ]
    .into_iter()
    .map(|(pattern, html)| (Regex::new(pattern).expect("valid regex"), html))
    .collect()
});

/// Telegram settings.
#[derive(Debug, Clone)]
pub struct TelegramChannelConfig {
    /// Token issued by @BotFather.
    pub token: String,
    /// Who gets answers.
    pub allowlist: Allowlist,
    /// Convert Markdown replies to HTML. Off means they are sent escaped.
    pub parse_markdown: bool,
    /// Longer text is split across several messages.
    pub max_message_length: usize,
}

impl TelegramChannelConfig {
    /// Settings for the bot behind `token`, open to everyone.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            allowlist: Allowlist::open(),
            parse_markdown: true,
            max_message_length: TELEGRAM_MAX_MESSAGE_LENGTH,
        }
    }

    /// Restrict the bot to `allowlist`.
    #[must_use]
    pub fn allowlist(mut self, allowlist: Allowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Turn Markdown conversion on or off.
    #[must_use]
    pub const fn parse_markdown(mut self, enabled: bool) -> Self {
        self.parse_markdown = enabled;
        self
    }
}

/// Questionnaire over a Telegram bot.
pub struct TelegramChannel {
    base: Arc<ChannelBase>,
    config: TelegramChannelConfig,
    stop: watch::Sender<bool>,
    output_task: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<(ShutdownToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("base", &self.base)
            .field("allowlist", &self.config.allowlist)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    /// Channel for `config`. Nothing connects until [`Channel::start`].
    #[must_use]
    pub fn new(config: TelegramChannelConfig) -> Self {
        Self {
            base: Arc::new(ChannelBase::new(TELEGRAM_CHANNEL)),
            config,
            stop: watch::Sender::new(false),
            output_task: Mutex::new(None),
            dispatcher: Mutex::new(None),
        }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Telegram HTML for the Markdown used in prompts.
fn markdown_to_html(text: &str) -> String {
    MARKDOWN_RULES
        .iter()
        .fold(escape_html(text), |html, (pattern, replacement)| {
            pattern.replace_all(&html, *replacement).into_owned()
        })
}

fn to_html(text: &str, format: MessageFormat, parse_markdown: bool) -> String {
    match format {
        MessageFormat::Markdown if parse_markdown => markdown_to_html(text),
        MessageFormat::Markdown | MessageFormat::Plain => escape_html(text),
    }
}

/// HTML messages for the text of `msg`, each at most `max_len` bytes.
///
/// The raw text is split before conversion so no part ends inside a tag
/// or an entity. Escaping can push a part over the limit, in which case
/// the text is split again with half the budget.
fn html_parts(msg: &OutboundMessage, parse_markdown: bool, max_len: usize) -> Vec<String> {
    let mut budget = max_len;
    loop {
        let parts: Vec<String> = split_into_chunks(&msg.content, budget)
            .iter()
            .map(|chunk| to_html(chunk, msg.format, parse_markdown))
            .collect();
        if budget <= 1 || parts.iter().all(|part| part.len() <= max_len) {
            return parts;
        }
        budget /= 2;
    }
}

/// Send the text of `msg`, split as needed, then its document.
async fn deliver(bot: &Bot, msg: &OutboundMessage, config: &TelegramChannelConfig) -> ChannelResult<()> {
    let chat = msg
        .chat_id
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| ChannelError::send(format!("not a Telegram chat: {}", msg.chat_id)))?;

    if !msg.content.is_empty() {
        for part in html_parts(msg, config.parse_markdown, config.max_message_length) {
            bot.send_message(chat, part)
                .parse_mode(ParseMode::Html)
                .await
                .map_err(|e| ChannelError::send(e.to_string()))?;
        }
    }

    if let Some(document) = &msg.document {
        let file = InputFile::memory(document.bytes.clone()).file_name(document.file_name.clone());
        let mut upload = bot.send_document(chat, file);
        if let Some(caption) = &document.caption {
            upload = upload.caption(caption.clone());
        }
        upload.await.map_err(|e| ChannelError::send(e.to_string()))?;
        debug!(chat_id = %msg.chat_id, file = %document.file_name, "document uploaded");
    }

    Ok(())
}

async fn output_loop(
    bot: Bot,
    base: Arc<ChannelBase>,
    config: TelegramChannelConfig,
    mut replies: mpsc::Receiver<OutboundMessage>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            reply = replies.recv() => match reply {
                Some(msg) => msg,
                None => break,
            },
            () = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break,
        };

        match deliver(&bot, &msg, &config).await {
            Ok(()) => base.record_sent(&msg),
            Err(e) => base.record_error(format!("chat {}: {e}", msg.chat_id)),
        }
    }
    debug!("telegram output loop finished");
}

/// Forward one update to the router if it is text from an allowed user.
async fn forward(msg: Message, inbox: Inbox, allowlist: Arc<Allowlist>, base: Arc<ChannelBase>) {
    let sender = msg
        .from
        .as_ref()
        .map(|user| user.id.0.to_string())
        .unwrap_or_default();
    let chat = msg.chat.id.0.to_string();

    if !allowlist.permits(&sender, &chat) {
        debug!(%sender, %chat, "update from outside the allowlist ignored");
        return;
    }
    let Some(text) = msg.text() else {
        debug!(%chat, "non-text update ignored");
        return;
    };

    base.record_received();
    if let Err(e) = inbox
        .submit(InboundMessage::new(TELEGRAM_CHANNEL, sender, chat, text))
        .await
    {
        warn!(error = %e, "telegram update dropped");
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        if self.config.token.trim().is_empty() {
            return Err(ChannelError::Config("telegram token is empty".to_string()));
        }
        self.base.set_state(ChannelState::Starting);
        self.stop.send_replace(false);

        let bot = Bot::new(&self.config.token);

        let output = tokio::spawn(output_loop(
            bot.clone(),
            Arc::clone(&self.base),
            self.config.clone(),
            bus.attach(TELEGRAM_CHANNEL).await,
            self.stop.subscribe(),
        ));
        *self.output_task.lock().await = Some(output);

        let inbox = bus.inbox();
        let allowlist = Arc::new(self.config.allowlist.clone());
        let base = Arc::clone(&self.base);
        let handler = Update::filter_message().endpoint(move |msg: Message| {
            let forwarded = forward(msg, inbox.clone(), Arc::clone(&allowlist), Arc::clone(&base));
            async move {
                forwarded.await;
                Ok::<(), teloxide::RequestError>(())
            }
        });

        let mut dispatcher = Dispatcher::builder(bot, handler).build();
        let token = dispatcher.shutdown_token();
        let polling = tokio::spawn(async move { dispatcher.dispatch().await });
        *self.dispatcher.lock().await = Some((token, polling));

        self.base.set_state(ChannelState::Running);
        info!("telegram channel polling");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping);
        self.stop.send_replace(true);

        if let Some((token, polling)) = self.dispatcher.lock().await.take() {
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => debug!(error = %e, "dispatcher already idle"),
            }
            let _ = polling.await;
        }
        if let Some(output) = self.output_task.lock().await.take() {
            let _ = output.await;
        }

        self.base.set_state(ChannelState::Stopped);
        info!("telegram channel stopped");
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.status()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TelegramChannelConfig::new("token123")
            .allowlist(Allowlist::open().sender("12345"))
            .parse_markdown(false);

        assert_eq!(config.token, "token123");
        assert!(config.allowlist.permits("12345", "any"));
        assert!(!config.allowlist.permits("99999", "any"));
        assert!(!config.parse_markdown);
        assert_eq!(config.max_message_length, TELEGRAM_MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn test_prompt_markdown() {
        assert_eq!(
            markdown_to_html("Enter the **contractor name**:"),
            "Enter the <b>contractor name</b>:"
        );
        assert_eq!(markdown_to_html("__city__"), "<b>city</b>");
        assert_eq!(markdown_to_html("*italic*"), "<i>italic</i>");
        assert_eq!(markdown_to_html("a *b* c"), "a <i>b</i> c");
        assert_eq!(markdown_to_html("`code`"), "<code>code</code>");
        assert_eq!(
            markdown_to_html("[text](https://example.com)"),
            r#"<a href="https://example.com">text</a>"#
        );
        assert_eq!(markdown_to_html("<script>"), "&lt;script&gt;");
        assert_eq!(markdown_to_html(""), "");
    }

    #[test]
    fn test_plain_text_is_escaped() {
        let plain = OutboundMessage::new(TELEGRAM_CHANNEL, "1", "Tom & **Jerry** <3");
        assert_eq!(html_parts(&plain, true, 100), ["Tom &amp; **Jerry** &lt;3"]);

        let markdown = plain.with_format(MessageFormat::Markdown);
        assert_eq!(html_parts(&markdown, true, 100), ["Tom &amp; <b>Jerry</b> &lt;3"]);
        assert_eq!(html_parts(&markdown, false, 100), ["Tom &amp; **Jerry** &lt;3"]);
    }

    #[test]
    fn test_long_text_is_split_before_conversion() {
        let content = ["**bold** & more"; 4].join("\n");
        let markdown =
            OutboundMessage::new(TELEGRAM_CHANNEL, "1", content).with_format(MessageFormat::Markdown);
        assert_eq!(html_parts(&markdown, true, 40), ["<b>bold</b> &amp; more"; 4]);

        let entities = OutboundMessage::new(TELEGRAM_CHANNEL, "1", "&&&&");
        assert_eq!(html_parts(&entities, true, 8), ["&amp;"; 4]);
    }

    #[test]
    fn test_output_loop_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}

        let (_tx, replies) = mpsc::channel(1);
        let (_stop, stopped) = watch::channel(false);
        let output = output_loop(
            Bot::new("token"),
            Arc::new(ChannelBase::new(TELEGRAM_CHANNEL)),
            TelegramChannelConfig::new("token"),
            replies,
            stopped,
        );
        assert_send(&output);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let channel = TelegramChannel::new(TelegramChannelConfig::new("  "));
        let err = channel.start(&MessageBus::new()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
        assert_eq!(channel.status().await.state, ChannelState::Stopped);
    }
}
