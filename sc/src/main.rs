//! streamchat - streaming chat client
//!
//! CLI entry point for the interactive REPL, one-shot prompts and the tag
//! tokenizer.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use streamchat::cli::{Cli, Command};
use streamchat::config::Config;
use streamchat::repl;
use streamchat::tags::TagMachine;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging isn't initialized yet, so problems here go to stderr
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("streamchat")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("streamchat.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(endpoint = %config.llm.endpoint, model = %config.llm.model, "streamchat loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        None | Some(Command::Chat) => {
            debug!("main: matched Chat command");
            let session_id = new_session_id();
            repl::run_interactive(&config, &session_id).await
        }
        Some(Command::Ask { prompt }) => {
            debug!(words = prompt.len(), "main: matched Ask command");
            let session_id = new_session_id();
            repl::run_ask(&config, &session_id, &prompt.join(" ")).await
        }
        Some(Command::Tags { chunk, allow }) => {
            debug!(chunk, ?allow, "main: matched Tags command");
            let allow = if allow.is_empty() { config.chat.tags.clone() } else { allow };
            cmd_tags(chunk, &allow)
        }
    }
}

fn new_session_id() -> String {
    let session_id = uuid::Uuid::now_v7().to_string();
    info!(%session_id, "new_session_id: starting session");
    session_id
}

/// Tokenize stdin and print one JSON token per line
fn cmd_tags(chunk: usize, allow: &[String]) -> Result<()> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).context("Failed to read stdin")?;
    debug!(len = input.len(), chunk, "cmd_tags: read input");

    let mut machine = TagMachine::new(allow);
    let mut stdout = io::stdout().lock();

    let chars: Vec<char> = input.chars().collect();
    let size = if chunk == 0 { chars.len().max(1) } else { chunk };
    for piece in chars.chunks(size) {
        let piece: String = piece.iter().collect();
        for token in machine.feed(&piece) {
            writeln!(stdout, "{}", serde_json::to_string(&token)?)?;
        }
    }
    for token in machine.finish() {
        writeln!(stdout, "{}", serde_json::to_string(&token)?)?;
    }

    Ok(())
}
