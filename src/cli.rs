//! Command-line argument parsing for the `warden` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::llm::LlmProvider;

/// A read-only SQL gateway with a tiered natural-language query front end.
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Use mock database (in-memory sample catalog, for testing)
    #[arg(long, global = true)]
    pub mock_db: bool,

    /// LLM provider to use (overrides config)
    #[arg(long, value_name = "PROVIDER", global = true)]
    pub llm: Option<LlmProvider>,

    /// Listen port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT", global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Ask one natural-language question and print the outcome as JSON
    Ask {
        /// The question to answer
        question: String,
    },

    /// Store a confirmed question and its SQL in query memory
    Remember {
        /// The natural-language question
        #[arg(long)]
        question: String,

        /// The SQL that answered it
        #[arg(long)]
        sql: String,

        /// Tier that produced the SQL (1 or 2)
        #[arg(long, default_value_t = 1)]
        tier: u8,
    },
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The subcommand to run, `serve` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Applies flag overrides on top of file and environment configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(provider) = self.llm {
            config.llm.provider = provider.as_str().to_string();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }

    /// True for commands whose stdout must stay machine-readable.
    pub fn is_one_shot(&self) -> bool {
        !matches!(self.command(), Command::Serve)
    }
}
