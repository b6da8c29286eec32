//! formdoc-bot - questionnaire chat bot that delivers filled-in documents.
//!
//! Users answer a fixed list of questions over a chat channel; the answers
//! are rendered into a document template, converted to PDF when possible,
//! and sent back.
//!
//! # Architecture
//!
//! - **Message Bus** ([`bus`]) - async queues between channels and the router
//! - **Channels** ([`channels`]) - chat transports (CLI, Telegram)
//! - **Conversation** ([`conversation`]) - maps messages to questionnaire steps
//! - **Gateway** ([`gateway`]) - runs everything together
//! - **Config** ([`config`]) - JSON configuration with environment overrides
//!
//! The questionnaire state machine and the document pipeline live in the
//! [`formdoc`] crate.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use formdoc_bot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = load_config().await?;
//!     let gateway = GatewayBuilder::new().bot_config(config).build()?;
//!     gateway.run().await
//! }
//! ```
//!
//! # Features
//!
//! - `telegram` - Telegram bot support via teloxide (default)

pub mod bus;
pub mod channel;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod gateway;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        BotError, BusError, BusResult, ChannelError, ChannelResult, ConfigError, ConfigResult,
        DisplayError, Result,
    };

    pub use crate::bus::{BusStats, Inbox, MessageBus};

    pub use crate::channel::{
        Allowlist, Channel, ChannelBase, ChannelManager, ChannelState, ChannelStatus,
    };
    pub use crate::channels::CliChannel;
    pub use crate::channels::cli::{CLI_CHANNEL, CliChannelConfig, save_document};
    #[cfg(feature = "telegram")]
    pub use crate::channels::{
        TelegramChannel,
        telegram::{TELEGRAM_CHANNEL, TelegramChannelConfig},
    };

    pub use crate::config::{
        BotConfig, ConfigIssue, ConvertConfig, DocumentConfig, IssueLevel, SessionsConfig,
        TelegramConfig, config_path, init_config, load_config, load_config_from, save_config,
    };

    pub use crate::conversation::{ConversationRouter, InboundEvent};

    pub use crate::events::{DocumentAttachment, InboundMessage, MessageFormat, OutboundMessage};

    pub use crate::gateway::{Gateway, GatewayBuilder, GatewayConfig, GatewayStatus};

    pub use crate::util::{config_dir, generate_id, home_dir, split_into_chunks, timestamp_ms};
}
