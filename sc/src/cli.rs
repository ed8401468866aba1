//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// streamchat - streaming chat client
#[derive(Debug, Parser)]
#[command(
    name = "sc",
    about = "Streaming chat client with incremental control-tag extraction",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute (defaults to chat)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start an interactive chat session
    Chat,

    /// Send a single prompt and print the streamed reply
    Ask {
        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// Tokenize stdin into text and control tags, one JSON token per line
    Tags {
        /// Feed the tokenizer this many characters at a time (0 = whole input)
        #[arg(short = 'n', long, default_value_t = 0)]
        chunk: usize,

        /// Allowed tag name; repeat for several (defaults to the configured tags)
        #[arg(short, long = "allow", value_name = "TAG")]
        allow: Vec<String>,
    },
}
