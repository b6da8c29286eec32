//! What travels over the bus.
//!
//! Channels wrap user input in [`InboundMessage`]; the router answers with
//! [`OutboundMessage`]s carrying text, a [`DocumentAttachment`], or both.

use crate::util::{generate_message_id, timestamp_ms};
use serde::{Deserialize, Serialize};

/// Text a user sent on some channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique per message.
    pub id: String,
    /// Channel the message arrived on, e.g. `telegram` or `cli`.
    pub channel: String,
    /// Who wrote it, as the channel identifies users.
    pub sender_id: String,
    /// Conversation it belongs to.
    pub chat_id: String,
    /// The text itself.
    pub content: String,
    /// Arrival time in milliseconds since the Unix epoch.
    pub received_at: u64,
}

impl InboundMessage {
    /// Wrap `content` from `sender_id` in `chat_id` on `channel`.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            received_at: timestamp_ms(),
        }
    }

    /// A line typed in the terminal.
    pub fn cli(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new("cli", "user", chat_id, content)
    }

    /// Registry key for this sender's questionnaire.
    ///
    /// Members of a group chat each get their own session, and chat IDs
    /// are only unique within a channel.
    #[must_use]
    pub fn session_key(&self) -> String {
        format!("{}:{}:{}", self.channel, self.chat_id, self.sender_id)
    }
}

/// A generated file on its way to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAttachment {
    /// Name the user sees.
    pub file_name: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Text shown together with the file.
    pub caption: Option<String>,
}

/// How a channel should interpret [`OutboundMessage::content`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    /// Show verbatim.
    #[default]
    Plain,
    /// Bold, italics, code and links in Markdown syntax.
    Markdown,
}

/// A reply for one chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique per message.
    pub id: String,
    /// Channel that delivers it.
    pub channel: String,
    /// Conversation it goes to.
    pub chat_id: String,
    /// Reply text. Empty for a bare document.
    pub content: String,
    /// File to send after the text.
    pub document: Option<DocumentAttachment>,
    /// ID of the inbound message this answers.
    pub reply_to: Option<String>,
    /// How `content` is formatted.
    pub format: MessageFormat,
}

impl OutboundMessage {
    /// Plain text for `chat_id` on `channel`.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            document: None,
            reply_to: None,
            format: MessageFormat::Plain,
        }
    }

    /// Text answering `msg` in the same chat.
    pub fn reply_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        let mut reply = Self::new(&msg.channel, &msg.chat_id, content);
        reply.reply_to = Some(msg.id.clone());
        reply
    }

    /// `document` for the chat `msg` came from.
    pub fn document_to(msg: &InboundMessage, document: DocumentAttachment) -> Self {
        let mut reply = Self::reply_to(msg, "");
        reply.document = Some(document);
        reply
    }

    /// Mark the text as `format`.
    #[must_use]
    pub const fn with_format(mut self, format: MessageFormat) -> Self {
        self.format = format;
        self
    }

    /// Whether a file is attached.
    #[must_use]
    pub const fn has_document(&self) -> bool {
        self.document.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_includes_channel() {
        let telegram = InboundMessage::new("telegram", "7", "100", "hi");
        let cli = InboundMessage::cli("100", "hi");

        assert_eq!(telegram.session_key(), "telegram:100:7");
        assert_ne!(telegram.session_key(), cli.session_key());

        let neighbour = InboundMessage::new("telegram", "8", "100", "hi");
        assert_ne!(telegram.session_key(), neighbour.session_key());
        assert_ne!(telegram.id, cli.id);
    }

    #[test]
    fn test_reply_stays_in_chat() {
        let inbound = InboundMessage::new("telegram", "7", "100", "Paris");
        let reply =
            OutboundMessage::reply_to(&inbound, "**Next**").with_format(MessageFormat::Markdown);

        assert_eq!((reply.channel.as_str(), reply.chat_id.as_str()), ("telegram", "100"));
        assert_eq!(reply.reply_to.as_deref(), Some(inbound.id.as_str()));
        assert_eq!(reply.format, MessageFormat::Markdown);
        assert!(!reply.has_document());
    }

    #[test]
    fn test_document_reply_has_no_text() {
        let inbound = InboundMessage::cli("direct", "Paris");
        let reply = OutboundMessage::document_to(
            &inbound,
            DocumentAttachment {
                file_name: "reply.pdf".to_string(),
                bytes: b"%PDF".to_vec(),
                caption: None,
            },
        );

        assert_eq!(reply.channel, "cli");
        assert!(reply.content.is_empty());
        assert!(reply.has_document());
        assert_eq!(reply.format, MessageFormat::Plain);
    }
}
