//! Bot configuration.
//!
//! Configuration lives in `~/.formdoc/config.json` (or the path in
//! `FORMDOC_CONFIG`). Every section has defaults, so a missing file or a
//! partial one is fine. `TELEGRAM_BOT_TOKEN` and `TEMPLATE_PATH` override
//! the file.

use crate::channel::Allowlist;
use crate::error::{ConfigError, ConfigResult};
use crate::util::config_dir;
use formdoc::document::{
    Converter, DEFAULT_OUTPUT_NAME, DisabledConverter, DocumentPipeline, OfficeConverter,
    template_from_path,
};
use formdoc::error::ScriptError;
use formdoc::script::{Field, Script};
use formdoc::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "FORMDOC_CONFIG";
/// Environment variable holding the Telegram bot token.
pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
/// Environment variable holding the template path.
pub const TEMPLATE_PATH_ENV: &str = "TEMPLATE_PATH";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BotConfig {
    /// Telegram channel.
    pub telegram: TelegramConfig,
    /// Template and conversion.
    pub document: DocumentConfig,
    /// Session lifetime.
    pub sessions: SessionsConfig,
    /// Terminal channel.
    pub cli: CliConfig,
    /// Greeting sent before the first question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    /// Custom questionnaire. The built-in claim-response script is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Vec<Field>>,
}

/// Telegram channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Whether the Telegram channel runs.
    pub enabled: bool,
    /// Bot token from @BotFather.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Who may use the bot.
    pub allowlist: Allowlist,
    /// Convert Markdown prompts to Telegram HTML.
    pub parse_markdown: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            allowlist: Allowlist::default(),
            parse_markdown: true,
        }
    }
}

impl TelegramConfig {
    /// The token, if one is set and non-empty.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Template and conversion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentConfig {
    /// Template file. `.docx` files are rendered as Word documents, anything
    /// else as plain text.
    pub template_path: PathBuf,
    /// File name of delivered documents, without extension.
    pub output_name: String,
    /// PDF conversion.
    pub convert: ConvertConfig,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from("template.docx"),
            output_name: "claim_response".to_string(),
            convert: ConvertConfig::default(),
        }
    }
}

/// PDF conversion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConvertConfig {
    /// When false every document is delivered in its template format.
    pub enabled: bool,
    /// Office binary.
    pub program: String,
    /// Seconds allowed for one conversion.
    pub timeout_secs: u64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "soffice".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Seconds of inactivity after which a session is dropped. 0 disables expiry.
    pub idle_timeout_secs: u64,
    /// Seconds between idle sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

/// Terminal channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CliConfig {
    /// Directory generated documents are saved to.
    pub output_dir: PathBuf,
    /// Input prompt.
    pub prompt: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            prompt: "> ".to_string(),
        }
    }
}

impl BotConfig {
    /// Apply `TELEGRAM_BOT_TOKEN` and `TEMPLATE_PATH` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TELEGRAM_TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
            debug!("telegram token taken from environment");
            self.telegram.token = Some(token);
        }
        if let Some(path) = lookup(TEMPLATE_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            debug!(template = %path, "template path taken from environment");
            self.document.template_path = PathBuf::from(path);
        }
    }

    /// Build the questionnaire.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] if a custom script is empty or has blank or
    /// duplicate keys.
    pub fn build_script(&self) -> Result<Script, ScriptError> {
        let script = match &self.script {
            Some(fields) => Script::new(fields.clone())?,
            None => Script::claim_response(),
        };
        Ok(match &self.greeting {
            Some(greeting) => script.with_greeting(greeting),
            None => script,
        })
    }

    /// Session registry settings.
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        let idle_timeout = match self.sessions.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        SessionConfig { idle_timeout }
    }

    /// Interval between idle sweeps, at least one second.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs.max(1))
    }

    /// Build the document pipeline.
    #[must_use]
    pub fn build_pipeline(&self) -> DocumentPipeline {
        let renderer = template_from_path(&self.document.template_path);
        let convert = &self.document.convert;
        let converter: Arc<dyn Converter> = if convert.enabled {
            Arc::new(
                OfficeConverter::new()
                    .with_program(&convert.program)
                    .with_timeout(Duration::from_secs(convert.timeout_secs)),
            )
        } else {
            Arc::new(DisabledConverter)
        };

        let output_name = match self.document.output_name.trim() {
            "" => DEFAULT_OUTPUT_NAME,
            name => name,
        };
        DocumentPipeline::new(renderer, converter).with_output_name(output_name)
    }

    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if let Err(e) = self.build_script() {
            issues.push(ConfigIssue::error(format!("script: {e}")));
        }

        let template = &self.document.template_path;
        if !template.is_file() {
            issues.push(ConfigIssue::error(format!(
                "template not found: {}",
                template.display()
            )));
        } else if !is_docx(template) {
            issues.push(ConfigIssue::warning(format!(
                "template {} is not a .docx file, it will be rendered as plain text",
                template.display()
            )));
        }

        if self.document.output_name.trim().is_empty() {
            issues.push(ConfigIssue::warning(format!(
                "document.outputName is empty, using \"{DEFAULT_OUTPUT_NAME}\""
            )));
        }

        let convert = &self.document.convert;
        if convert.enabled && convert.timeout_secs == 0 {
            issues.push(ConfigIssue::error("document.convert.timeoutSecs must be positive"));
        }
        if convert.enabled && convert.program.trim().is_empty() {
            issues.push(ConfigIssue::error("document.convert.program is empty"));
        }
        if !convert.enabled {
            issues.push(ConfigIssue::warning(
                "PDF conversion is disabled, documents are sent in template format",
            ));
        }

        if self.telegram.enabled && self.telegram.token().is_none() {
            issues.push(ConfigIssue::warning(format!(
                "telegram is enabled but no token is set (config or {TELEGRAM_TOKEN_ENV})"
            )));
        }

        if self.sessions.sweep_interval_secs == 0 {
            issues.push(ConfigIssue::warning(
                "sessions.sweepIntervalSecs is 0, using 1 second",
            ));
        }

        issues
    }
}

fn is_docx(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("docx"))
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueLevel {
    /// The bot runs, but probably not as intended.
    Warning,
    /// The bot cannot do its job.
    Error,
}

/// A problem found by [`BotConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// What is wrong.
    pub message: String,
}

impl ConfigIssue {
    /// Create a warning.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            message: message.into(),
        }
    }

    /// Create an error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            message: message.into(),
        }
    }

    /// Whether this issue prevents the bot from running.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == IssueLevel::Error
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            IssueLevel::Warning => "warning",
            IssueLevel::Error => "error",
        };
        write!(f, "{level}: {}", self.message)
    }
}

/// Path of the configuration file.
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|p| !p.is_empty())
        .map_or_else(|| config_dir().join("config.json"), PathBuf::from)
}

/// Load the configuration from [`config_path`] and apply environment overrides.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
pub async fn load_config() -> ConfigResult<BotConfig> {
    let mut config = load_config_from(&config_path()).await?;
    config.apply_env();
    Ok(config)
}

/// Load the configuration from `path`. A missing file yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
pub async fn load_config_from(path: &Path) -> ConfigResult<BotConfig> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(BotConfig::default());
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let config = serde_json::from_str(&content)?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Write `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError`] if serialization or writing fails.
pub async fn save_config(config: &BotConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    info!(path = %path.display(), "config saved");
    Ok(())
}

/// Write a default configuration to `path`.
///
/// Returns `false` without touching the file if it already exists and
/// `force` is not set.
///
/// # Errors
///
/// Returns [`ConfigError`] if writing fails.
pub async fn init_config(path: &Path, force: bool) -> ConfigResult<bool> {
    if !force && tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    save_config(&BotConfig::default(), path).await?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert!(config.telegram.enabled);
        assert_eq!(config.document.template_path, PathBuf::from("template.docx"));
        assert_eq!(config.sessions.idle_timeout_secs, 3600);
        assert_eq!(
            config.session_config().idle_timeout,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.build_script().unwrap().len(), 11);
    }

    #[test]
    fn test_partial_json() {
        let config: BotConfig = serde_json::from_str(
            r#"{
                "telegram": {"token": "123:abc", "allowlist": {"senders": ["42"]}},
                "document": {"templatePath": "reply.docx", "convert": {"enabled": false}},
                "sessions": {"idleTimeoutSecs": 0},
                "greeting": "Hi",
                "script": [{"key": "name", "prompt": "Name?"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.telegram.token(), Some("123:abc"));
        assert!(config.telegram.allowlist.permits("42", "any"));
        assert!(!config.document.convert.enabled);
        assert_eq!(config.document.convert.program, "soffice");
        assert_eq!(config.session_config().idle_timeout, None);

        let script = config.build_script().unwrap();
        assert_eq!(script.len(), 1);
        assert_eq!(script.greeting(), "Hi");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BotConfig::default();
        config.apply_env_from(|name| match name {
            TELEGRAM_TOKEN_ENV => Some("999:xyz".to_string()),
            TEMPLATE_PATH_ENV => Some("/srv/template.docx".to_string()),
            _ => None,
        });
        assert_eq!(config.telegram.token(), Some("999:xyz"));
        assert_eq!(
            config.document.template_path,
            PathBuf::from("/srv/template.docx")
        );

        config.apply_env_from(|_| Some("  ".to_string()));
        assert_eq!(config.telegram.token(), Some("999:xyz"));
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.docx");
        std::fs::write(&template, b"PK").unwrap();

        let mut config = BotConfig::default();
        config.document.template_path = template;
        config.telegram.token = Some("123:abc".to_string());
        assert!(config.validate().is_empty());

        config.script = Some(Vec::new());
        config.telegram.token = None;
        config.document.template_path = dir.path().join("missing.docx");
        let issues = config.validate();
        assert_eq!(issues.iter().filter(|i| i.is_error()).count(), 2);
        assert!(
            issues
                .iter()
                .any(|i| i.level == IssueLevel::Warning && i.message.contains("token"))
        );
    }

    #[test]
    fn test_validate_text_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.md");
        std::fs::write(&template, "{{name}}").unwrap();

        let mut config = BotConfig::default();
        config.telegram.enabled = false;
        config.document.template_path = template;

        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, IssueLevel::Warning);
        assert!(issues[0].to_string().starts_with("warning: "));
    }

    #[test]
    fn test_pipeline_output_name() {
        let mut config = BotConfig::default();
        assert_eq!(config.build_pipeline().output_name(), "claim_response");

        config.document.output_name = "  ".to_string();
        assert_eq!(config.build_pipeline().output_name(), DEFAULT_OUTPUT_NAME);
    }

    #[tokio::test]
    async fn test_save_load_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        assert_eq!(load_config_from(&path).await.unwrap(), BotConfig::default());

        assert!(init_config(&path, false).await.unwrap());
        assert!(!init_config(&path, false).await.unwrap());

        let mut config = load_config_from(&path).await.unwrap();
        config.cli.output_dir = PathBuf::from("out");
        save_config(&config, &path).await.unwrap();
        assert_eq!(
            load_config_from(&path).await.unwrap().cli.output_dir,
            PathBuf::from("out")
        );

        assert!(init_config(&path, true).await.unwrap());
        assert_eq!(load_config_from(&path).await.unwrap(), BotConfig::default());
    }

    #[tokio::test]
    async fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_config_from(&path).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
