//! Errors raised by the bot.
//!
//! Each layer has its own enum; all of them fold into [`BotError`], which
//! is what the gateway and the binary report.

use std::fmt;

/// Anything that can stop the bot or a command.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Inbox or reply routing failed.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// A chat transport failed.
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    /// The configuration could not be read or is unusable.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Questionnaire or document generation failed.
    #[error("core: {0}")]
    Core(#[from] formdoc::Error),
}

impl BotError {
    /// Configuration that parsed but cannot be used.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}

impl From<formdoc::error::ScriptError> for BotError {
    fn from(err: formdoc::error::ScriptError) -> Self {
        Self::Core(err.into())
    }
}

/// Result with [`BotError`].
pub type Result<T> = std::result::Result<T, BotError>;

/// Message bus failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The inbox was closed; no more user input is accepted.
    #[error("inbox closed")]
    InboundClosed,

    /// No attached channel accepted a reply.
    #[error("no channel named {0} is attached")]
    ChannelNotFound(String),
}

/// Result with [`BusError`].
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Chat transport failures.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The transport could not come up.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// A reply or document did not reach the user.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The channel settings are unusable.
    #[error("config: {0}")]
    Config(String),
}

impl ChannelError {
    /// [`ChannelError::StartFailed`] with `msg`.
    pub fn start(msg: impl Into<String>) -> Self {
        Self::StartFailed(msg.into())
    }

    /// [`ChannelError::SendFailed`] with `msg`.
    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }
}

/// Result with [`ChannelError`].
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Configuration file failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for [`BotConfig`](crate::config::BotConfig).
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid: {0}")]
    Invalid(String),
}

/// Result with [`ConfigError`].
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Formats a [`BotError`] for the person running the binary.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a BotError);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BotError::Config(e) => write!(f, "Configuration problem: {e}"),
            BotError::Channel(e) => write!(f, "Chat channel problem: {e}"),
            BotError::Bus(e) => write!(f, "Message routing problem: {e}"),
            BotError::Core(e) => write!(f, "Document problem: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_fold_into_bot_error() {
        assert!(matches!(
            BotError::from(BusError::InboundClosed),
            BotError::Bus(_)
        ));
        assert!(matches!(
            BotError::from(ChannelError::start("no token")),
            BotError::Channel(_)
        ));
        assert!(matches!(
            BotError::from(formdoc::error::ScriptError::Empty),
            BotError::Core(formdoc::Error::Script(_))
        ));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            BusError::ChannelNotFound("fax".to_string()).to_string(),
            "no channel named fax is attached"
        );
        assert_eq!(
            ChannelError::send("timeout").to_string(),
            "send failed: timeout"
        );
    }

    #[test]
    fn test_display_error() {
        let err = BotError::config("sweep interval is zero");
        assert_eq!(
            DisplayError(&err).to_string(),
            "Configuration problem: invalid: sweep interval is zero"
        );
    }
}
