//! formdoc-bot CLI.
//!
//! Runs the questionnaire bot on Telegram and/or the terminal.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use formdoc_bot::config::{BotConfig, IssueLevel, config_path, init_config, load_config_from};
use formdoc_bot::error::{BotError, DisplayError, Result};
use formdoc_bot::gateway::{Gateway, GatewayBuilder};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

/// Questionnaire bot that sends back a filled-in document.
#[derive(Parser)]
#[command(name = "formdoc-bot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "FORMDOC_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(InitArgs),

    /// Run the bot on all configured channels
    Run(RunArgs),

    /// Fill in the questionnaire in this terminal
    Chat,

    /// Show configuration and check it for problems
    Status,

    /// List the questions the bot asks
    Fields,
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the run command
#[derive(Args)]
struct RunArgs {
    /// Disable the Telegram channel
    #[arg(long)]
    no_telegram: bool,

    /// Disable the terminal channel
    #[arg(long)]
    no_cli: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", DisplayError(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
///
/// Logs go to stderr so they do not interleave with the terminal questionnaire.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "formdoc_bot={level},formdoc={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let path = cli.config.unwrap_or_else(config_path);
    match cli.command {
        Commands::Init(args) => cmd_init(&path, args).await,
        Commands::Run(args) => cmd_run(&path, args).await,
        Commands::Chat => cmd_chat(&path).await,
        Commands::Status => cmd_status(&path).await,
        Commands::Fields => cmd_fields(&path).await,
    }
}

async fn load(path: &Path) -> Result<BotConfig> {
    let mut config = load_config_from(path).await?;
    config.apply_env();
    Ok(config)
}

/// Log validation issues and fail on errors.
fn check(config: &BotConfig) -> Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.level {
            IssueLevel::Warning => warn!("{}", issue.message),
            IssueLevel::Error => tracing::error!("{}", issue.message),
        }
    }

    let errors = issues.iter().filter(|i| i.is_error()).count();
    if errors > 0 {
        return Err(BotError::config(format!(
            "{errors} configuration error(s), run `formdoc-bot status` for details"
        )));
    }
    Ok(())
}

async fn cmd_init(path: &Path, args: InitArgs) -> Result<()> {
    if !init_config(path, args.force).await? {
        println!("Configuration already exists at: {}", path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    println!("Configuration created: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Put your template at document.templatePath (or set TEMPLATE_PATH)");
    println!("  2. export TELEGRAM_BOT_TOKEN=<token>");
    println!("  3. formdoc-bot run");

    Ok(())
}

async fn cmd_run(path: &Path, args: RunArgs) -> Result<()> {
    let config = load(path).await?;
    check(&config)?;

    let gateway = GatewayBuilder::new()
        .bot_config(config)
        .enable_cli(!args.no_cli)
        .enable_telegram(!args.no_telegram)
        .build()?;

    println!("Bot running. Press Ctrl+C to stop.\n");
    serve(&gateway, false).await
}

async fn cmd_chat(path: &Path) -> Result<()> {
    let config = load(path).await?;
    check(&config)?;

    let gateway = GatewayBuilder::new()
        .bot_config(config)
        .enable_cli(true)
        .enable_telegram(false)
        .build()?;

    println!("formdoc chat | send /start to begin, 'exit' to quit\n");
    serve(&gateway, true).await
}

/// Run the gateway until Ctrl+C, or until the terminal user quits when
/// `until_cli_exit` is set.
async fn serve(gateway: &Gateway, until_cli_exit: bool) -> Result<()> {
    let run = gateway.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        () = gateway.cli_finished(), if until_cli_exit => info!("terminal session ended"),
    }

    println!("\nShutting down...");
    gateway.stop();
    run.await
}

async fn cmd_status(path: &Path) -> Result<()> {
    println!("formdoc-bot status\n");
    println!("Configuration:");
    println!("  Path:   {}", path.display());
    println!("  Exists: {}", if path.exists() { "yes" } else { "no" });

    let config = match load(path).await {
        Ok(config) => config,
        Err(e) => {
            println!("  Valid:  no ({e})");
            return Ok(());
        }
    };

    let document = &config.document;
    println!();
    println!("Document:");
    println!("  Template:   {}", document.template_path.display());
    println!("  Output:     {}", document.output_name);
    if document.convert.enabled {
        println!(
            "  Conversion: {} (timeout {}s)",
            document.convert.program, document.convert.timeout_secs
        );
    } else {
        println!("  Conversion: disabled");
    }

    println!();
    println!("Sessions:");
    match config.sessions.idle_timeout_secs {
        0 => println!("  Idle timeout: none"),
        secs => println!("  Idle timeout: {secs}s"),
    }

    println!();
    println!("Channels:");
    let telegram = if !config.telegram.enabled {
        "disabled"
    } else if config.telegram.token().is_some() {
        "enabled"
    } else {
        "enabled, no token"
    };
    println!("  Telegram: {telegram}");
    println!("  CLI output: {}", config.cli.output_dir.display());

    println!();
    let issues = config.validate();
    if issues.is_empty() {
        println!("No problems found.");
    } else {
        println!("Problems:");
        for issue in issues {
            println!("  {issue}");
        }
    }

    Ok(())
}

async fn cmd_fields(path: &Path) -> Result<()> {
    let config = load(path).await?;
    let script = config.build_script()?;

    println!("{}\n", script.greeting());
    for (index, field) in script.fields().iter().enumerate() {
        println!("{:>2}. {:<16} {}", index + 1, field.key, field.prompt);
    }

    Ok(())
}
