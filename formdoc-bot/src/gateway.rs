//! Runs the whole bot.
//!
//! A [`Gateway`] owns the bus, the channels, the conversation router and
//! the idle session sweeper, and starts and stops them together.

use crate::bus::{BusStats, MessageBus};
use crate::channel::{Channel, ChannelManager, ChannelStatus};
use crate::channels::CliChannel;
use crate::channels::cli::CliChannelConfig;
use crate::config::BotConfig;
use crate::conversation::ConversationRouter;
use crate::error::{ChannelError, Result};
use formdoc::session::{SessionRegistry, SessionSweeper};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

#[cfg(feature = "telegram")]
use crate::channels::{TelegramChannel, telegram::TelegramChannelConfig};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bot configuration.
    pub bot_config: BotConfig,
    /// Whether to run the terminal channel.
    pub enable_cli: bool,
    /// Whether to run the Telegram channel (if configured).
    pub enable_telegram: bool,
    /// Terminal channel settings.
    pub cli: CliChannelConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_bot_config(BotConfig::default())
    }
}

impl GatewayConfig {
    /// Derive gateway settings from the bot configuration.
    #[must_use]
    pub fn from_bot_config(bot_config: BotConfig) -> Self {
        let cli = CliChannelConfig::new()
            .prompt(&bot_config.cli.prompt)
            .output_dir(&bot_config.cli.output_dir);
        Self {
            enable_telegram: bot_config.telegram.enabled,
            bot_config,
            enable_cli: true,
            cli,
        }
    }
}

/// Runs the channels, the router and the sweeper until stopped.
pub struct Gateway {
    config: GatewayConfig,
    bus: MessageBus,
    channel_manager: ChannelManager,
    registry: Arc<SessionRegistry>,
    router: ConversationRouter,
    sweeper: SessionSweeper,
    cli: Option<Arc<CliChannel>>,
    running: AtomicBool,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Assemble the registry, pipeline, router and channels described by
    /// `config`. Nothing runs until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns an error if the configured script is invalid.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let settings = &config.bot_config;
        let registry = Arc::new(SessionRegistry::with_config(
            settings.build_script()?,
            settings.session_config(),
        ));
        let sweeper = SessionSweeper::new(Arc::clone(&registry), settings.sweep_interval());

        let bus = MessageBus::new();
        let router = ConversationRouter::new(
            bus.clone(),
            Arc::clone(&registry),
            Arc::new(settings.build_pipeline()),
        );
        let cli = config
            .enable_cli
            .then(|| Arc::new(CliChannel::with_config(config.cli.clone())));

        Ok(Self {
            channel_manager: ChannelManager::new(bus.clone()),
            bus,
            registry,
            router,
            sweeper,
            cli,
            config,
            running: AtomicBool::new(false),
        })
    }

    /// The bus channels and router share.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Questionnaires in progress.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Registered channels.
    #[must_use]
    pub const fn channel_manager(&self) -> &ChannelManager {
        &self.channel_manager
    }

    async fn register_channels(&self) {
        if !self.channel_manager.is_empty().await {
            return;
        }

        if let Some(cli) = &self.cli {
            let channel: Arc<dyn Channel> = Arc::<CliChannel>::clone(cli);
            self.channel_manager.register(channel).await;
        }

        if !self.config.enable_telegram {
            return;
        }
        let telegram = &self.config.bot_config.telegram;
        let Some(token) = telegram.token() else {
            warn!("telegram is enabled but has no token, skipping it");
            return;
        };

        #[cfg(feature = "telegram")]
        {
            let settings = TelegramChannelConfig::new(token)
                .allowlist(telegram.allowlist.clone())
                .parse_markdown(telegram.parse_markdown);
            self.channel_manager
                .register(Arc::new(TelegramChannel::new(settings)))
                .await;
        }

        #[cfg(not(feature = "telegram"))]
        {
            let _ = token;
            warn!("telegram is configured but this build lacks the telegram feature");
        }
    }

    /// Serve conversations until [`stop`](Self::stop) is called.
    ///
    /// Channels that fail to start are skipped; the sweeper runs alongside
    /// the router and everything is shut down before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if no channel could be started or the router fails.
    pub async fn run(&self) -> Result<()> {
        self.register_channels().await;

        let started = self.channel_manager.start_all().await;
        if started == 0 {
            self.channel_manager.stop_all().await;
            return Err(ChannelError::start("no channel could be started").into());
        }

        self.running.store(true, Ordering::SeqCst);
        let sweeper = self.sweeper.start();
        info!(
            fields = self.registry.script().len(),
            channels = started,
            "gateway serving"
        );

        let outcome = self.router.run().await;
        if let Err(e) = &outcome {
            error!(error = %e, "router failed");
        }

        sweeper.stop().await;
        self.channel_manager.stop_all().await;
        self.running.store(false, Ordering::SeqCst);

        let traffic = self.bus.stats();
        info!(
            inbound = traffic.inbound,
            outbound = traffic.outbound,
            undelivered = traffic.undelivered,
            "gateway stopped"
        );
        outcome
    }

    /// Ask [`run`](Self::run) to shut down.
    pub fn stop(&self) {
        self.router.stop();
    }

    /// Resolve once the terminal user is done. Never resolves without a CLI channel.
    pub async fn cli_finished(&self) {
        match &self.cli {
            Some(cli) => cli.input_finished().await,
            None => std::future::pending().await,
        }
    }

    /// Whether [`run`](Self::run) is serving.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Channels, open questionnaires and bus traffic right now.
    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            running: self.is_running(),
            active_sessions: self.registry.active_count().await,
            channels: self.channel_manager.statuses().await,
            traffic: self.bus.stats(),
        }
    }
}

/// Snapshot returned by [`Gateway::status`].
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    /// Whether the gateway is serving.
    pub running: bool,
    /// Questionnaires in progress.
    pub active_sessions: usize,
    /// Every registered channel.
    pub channels: Vec<ChannelStatus>,
    /// Message counts since start-up.
    pub traffic: BusStats,
}

/// Builder for creating a [`Gateway`].
#[derive(Debug, Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
}

impl GatewayBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bot configuration. Resets CLI and Telegram settings to match it.
    #[must_use]
    pub fn bot_config(mut self, config: BotConfig) -> Self {
        let enable_cli = self.config.enable_cli;
        self.config = GatewayConfig::from_bot_config(config);
        self.config.enable_cli = enable_cli;
        self
    }

    /// Enable or disable the terminal channel.
    #[must_use]
    pub const fn enable_cli(mut self, enable: bool) -> Self {
        self.config.enable_cli = enable;
        self
    }

    /// Enable or disable the Telegram channel.
    #[must_use]
    pub const fn enable_telegram(mut self, enable: bool) -> Self {
        self.config.enable_telegram = enable;
        self
    }

    /// Replace the terminal channel settings.
    #[must_use]
    pub fn cli_config(mut self, cli: CliChannelConfig) -> Self {
        self.config.cli = cli;
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured script is invalid.
    pub fn build(self) -> Result<Gateway> {
        Gateway::new(self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::InboundMessage;
    use formdoc::script::Field;
    use std::time::Duration;

    fn text_config(dir: &std::path::Path) -> BotConfig {
        let template = dir.join("template.txt");
        std::fs::write(&template, "Reply to {{client}}").unwrap();

        let mut config = BotConfig::default();
        config.telegram.enabled = false;
        config.document.template_path = template;
        config.document.convert.enabled = false;
        config.document.output_name = "reply".to_string();
        config.cli.output_dir = dir.join("out");
        config.script = Some(vec![Field::new("client", "Client name?")]);
        config
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.enable_cli);
        assert!(config.enable_telegram);
        assert_eq!(config.cli.prompt, "> ");
    }

    #[test]
    fn test_invalid_script() {
        let mut config = BotConfig::default();
        config.script = Some(Vec::new());
        assert!(GatewayBuilder::new().bot_config(config).build().is_err());
    }

    #[tokio::test]
    async fn test_no_channels_fails() {
        let mut config = BotConfig::default();
        config.telegram.enabled = false;
        let gateway = GatewayBuilder::new()
            .bot_config(config)
            .enable_cli(false)
            .build()
            .unwrap();

        assert!(gateway.run().await.is_err());
        assert!(!gateway.is_running());
    }

    #[tokio::test]
    async fn test_questionnaire_over_cli() {
        let dir = tempfile::tempdir().unwrap();
        let config = text_config(dir.path());
        let cli = CliChannelConfig::new()
            .read_stdin(false)
            .output_dir(dir.path().join("out"));

        let gateway = Arc::new(
            GatewayBuilder::new()
                .bot_config(config)
                .cli_config(cli)
                .build()
                .unwrap(),
        );
        let mut observed = gateway.bus().observe();

        let runner = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.run().await })
        };

        let bus = gateway.bus().clone();
        bus.submit(InboundMessage::cli("direct", "/start"))
            .await
            .unwrap();
        bus.submit(InboundMessage::cli("direct", "ACME"))
            .await
            .unwrap();

        let document = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let msg = observed.recv().await.unwrap();
                if let Some(document) = msg.document {
                    return document;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(document.file_name, "reply.txt");
        assert_eq!(document.bytes, b"Reply to ACME");

        let status = gateway.status().await;
        assert!(status.running);
        assert_eq!(status.active_sessions, 0);
        assert_eq!(status.channels.len(), 1);
        assert_eq!(status.traffic.inbound, 2);
        assert!(status.channels[0].healthy());

        gateway.stop();
        runner.await.unwrap().unwrap();
        assert!(!gateway.is_running());
    }
}
