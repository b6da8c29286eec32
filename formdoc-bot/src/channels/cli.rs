//! Terminal channel.
//!
//! Every stdin line is one message in a single chat. Replies are printed,
//! and generated documents are saved under the output directory with
//! their path printed in place of the file.

use crate::bus::{Inbox, MessageBus};
use crate::channel::{Channel, ChannelBase, ChannelState, ChannelStatus};
use crate::error::ChannelResult;
use crate::events::{DocumentAttachment, InboundMessage, OutboundMessage};
use crate::util::timestamp_ms;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Name replies for the terminal are routed by.
pub const CLI_CHANNEL: &str = "cli";

/// Lines that end the terminal session.
const QUIT_COMMANDS: &[&str] = &["exit", "quit", "/quit"];

/// Terminal channel settings.
#[derive(Debug, Clone)]
pub struct CliChannelConfig {
    /// Printed before each line of input.
    pub prompt: String,
    /// Chat ID of the terminal conversation.
    pub chat_id: String,
    /// Where generated documents are saved.
    pub output_dir: PathBuf,
    /// Read answers from stdin. Off in tests and when only output is wanted.
    pub read_stdin: bool,
}

impl Default for CliChannelConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            chat_id: "direct".to_string(),
            output_dir: PathBuf::from("."),
            read_stdin: true,
        }
    }
}

impl CliChannelConfig {
    /// Default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `text` as the input prompt.
    #[must_use]
    pub fn prompt(mut self, text: impl Into<String>) -> Self {
        self.prompt = text.into();
        self
    }

    /// Use `chat_id` for the terminal conversation.
    #[must_use]
    pub fn chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = chat_id.into();
        self
    }

    /// Save documents under `dir`.
    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Turn stdin reading on or off.
    #[must_use]
    pub const fn read_stdin(mut self, enabled: bool) -> Self {
        self.read_stdin = enabled;
        self
    }
}

/// Questionnaire in the terminal.
#[derive(Debug)]
pub struct CliChannel {
    base: Arc<ChannelBase>,
    config: CliChannelConfig,
    stop: watch::Sender<bool>,
    input_done: watch::Sender<bool>,
    output_task: Mutex<Option<JoinHandle<()>>>,
    input_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CliChannel {
    /// Terminal channel with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CliChannelConfig::default())
    }

    /// Terminal channel with `config`.
    #[must_use]
    pub fn with_config(config: CliChannelConfig) -> Self {
        Self {
            base: Arc::new(ChannelBase::new(CLI_CHANNEL)),
            config,
            stop: watch::Sender::new(false),
            input_done: watch::Sender::new(false),
            output_task: Mutex::new(None),
            input_task: Mutex::new(None),
        }
    }

    /// Resolve once stdin is exhausted or the user typed a quit command.
    pub async fn input_finished(&self) {
        let mut done = self.input_done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Starting);
        self.stop.send_replace(false);

        let replies = bus.attach(CLI_CHANNEL).await;
        let output = tokio::spawn(output_loop(
            Arc::clone(&self.base),
            self.config.clone(),
            replies,
            self.stop.subscribe(),
        ));
        *self.output_task.lock().await = Some(output);

        if self.config.read_stdin {
            show_prompt(&self.config.prompt);
            let input = tokio::spawn(input_loop(
                bus.inbox(),
                Arc::clone(&self.base),
                self.config.chat_id.clone(),
                self.input_done.clone(),
            ));
            *self.input_task.lock().await = Some(input);
        }

        self.base.set_state(ChannelState::Running);
        info!(output_dir = %self.config.output_dir.display(), "terminal channel running");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping);
        self.stop.send_replace(true);

        if let Some(input) = self.input_task.lock().await.take() {
            input.abort();
        }
        if let Some(output) = self.output_task.lock().await.take() {
            let _ = output.await;
        }

        self.base.set_state(ChannelState::Stopped);
        debug!("terminal channel stopped");
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.status()
    }
}

async fn output_loop(
    base: Arc<ChannelBase>,
    config: CliChannelConfig,
    mut replies: mpsc::Receiver<OutboundMessage>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            reply = replies.recv() => {
                let Some(msg) = reply else { break };
                show(&base, &config, &msg).await;
            }
            () = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break,
        }
    }
    debug!("terminal output loop finished");
}

async fn show(base: &ChannelBase, config: &CliChannelConfig, msg: &OutboundMessage) {
    print_reply(msg);

    if let Some(document) = &msg.document {
        match save_document(&config.output_dir, document).await {
            Ok(path) => print_saved(&path, document.caption.as_deref()),
            Err(e) => {
                base.record_error(format!("cannot save {}: {e}", document.file_name));
                show_prompt(&config.prompt);
                return;
            }
        }
    }

    base.record_sent(msg);
    show_prompt(&config.prompt);
}

async fn input_loop(
    inbox: Inbox,
    base: Arc<ChannelBase>,
    chat_id: String,
    done: watch::Sender<bool>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };

        let text = line.trim();
        if QUIT_COMMANDS.contains(&text) {
            break;
        }
        if text.is_empty() {
            continue;
        }

        base.record_received();
        if let Err(e) = inbox.submit(InboundMessage::cli(&chat_id, text)).await {
            warn!(error = %e, "terminal input dropped");
            break;
        }
    }

    done.send_replace(true);
}

#[allow(clippy::print_stdout)] // the terminal channel writes to stdout
fn show_prompt(prompt: &str) {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
}

#[allow(clippy::print_stdout)]
fn print_reply(msg: &OutboundMessage) {
    if !msg.content.is_empty() {
        println!("\n{}\n", msg.content);
    }
}

#[allow(clippy::print_stdout)]
fn print_saved(path: &Path, caption: Option<&str>) {
    println!("Document saved to {}", path.display());
    if let Some(caption) = caption {
        println!("{caption}");
    }
}

/// Save `document` under `dir`.
///
/// An existing file is never replaced; a timestamp is added to the name
/// instead.
pub async fn save_document(dir: &Path, document: &DocumentAttachment) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let mut path = dir.join(&document.file_name);
    if tokio::fs::try_exists(&path).await? {
        let original = Path::new(&document.file_name);
        let stem = original
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let renamed = match original.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}-{}.{ext}", timestamp_ms()),
            None => format!("{stem}-{}", timestamp_ms()),
        };
        path = dir.join(renamed);
    }

    tokio::fs::write(&path, &document.bytes).await?;
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pdf(name: &str) -> DocumentAttachment {
        DocumentAttachment {
            file_name: name.to_string(),
            bytes: b"%PDF".to_vec(),
            caption: None,
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let channel = CliChannel::with_config(CliChannelConfig::new().read_stdin(false));
        let bus = MessageBus::new();

        channel.start(&bus).await.unwrap();
        assert!(channel.is_running().await);

        channel.stop().await.unwrap();
        assert_eq!(channel.status().await.state, ChannelState::Stopped);
    }

    #[tokio::test]
    async fn test_routed_document_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let channel = CliChannel::with_config(
            CliChannelConfig::new()
                .read_stdin(false)
                .output_dir(dir.path()),
        );
        let bus = MessageBus::new();
        channel.start(&bus).await.unwrap();

        let inbound = InboundMessage::cli("direct", "last answer");
        bus.deliver(OutboundMessage::document_to(&inbound, pdf("reply.pdf")))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while channel.status().await.documents == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(std::fs::read(dir.path().join("reply.pdf")).unwrap(), b"%PDF");

        channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();

        let first = save_document(dir.path(), &pdf("reply.pdf")).await.unwrap();
        let second = save_document(dir.path(), &pdf("reply.pdf")).await.unwrap();

        assert_eq!(first, dir.path().join("reply.pdf"));
        assert_ne!(first, second);
        assert_eq!(second.extension().and_then(|e| e.to_str()), Some("pdf"));
        assert_eq!(std::fs::read(second).unwrap(), b"%PDF");
    }

    #[test]
    fn test_loops_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}

        let bus = MessageBus::new();
        let (_tx, replies) = mpsc::channel(1);
        let (_stop, stopped) = watch::channel(false);
        let output = output_loop(
            Arc::new(ChannelBase::new(CLI_CHANNEL)),
            CliChannelConfig::new(),
            replies,
            stopped,
        );
        let input = input_loop(
            bus.inbox(),
            Arc::new(ChannelBase::new(CLI_CHANNEL)),
            "direct".to_string(),
            watch::Sender::new(false),
        );

        assert_send(&output);
        assert_send(&input);
    }

    #[tokio::test]
    async fn test_stop_ends_idle_output_loop() {
        let (_tx, replies) = mpsc::channel(1);
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(output_loop(
            Arc::new(ChannelBase::new(CLI_CHANNEL)),
            CliChannelConfig::new(),
            replies,
            stopped,
        ));

        stop.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let config = CliChannelConfig::new().prompt(">> ").chat_id("desk");

        assert_eq!(config.prompt, ">> ");
        assert_eq!(config.chat_id, "desk");
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert!(config.read_stdin);
    }
}
