//! Command-line interface.
//!
//! `searchgate` with no subcommand starts the server; `config` inspects
//! the effective configuration, `token generate` mints a client token
//! straight into the store for bootstrap.

pub mod config;
pub mod token;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sg_domain::config::Config;

#[derive(Parser)]
#[command(
    name = "searchgate",
    about = "Multi-tenant MCP gateway for Tavily and Brave web search",
    version
)]
pub struct Cli {
    /// Path to a TOML config file (default: ./searchgate.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway (default).
    Serve,
    /// Inspect or validate configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Client-token utilities.
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Check the config file and environment and report issues.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Mint a client token and store it. Prints the full token once.
    Generate {
        #[arg(long)]
        description: Option<String>,
        /// Restrict the token to these tools (repeatable).
        #[arg(long = "allow-tool")]
        allowed_tools: Vec<String>,
        /// Per-token requests/minute override.
        #[arg(long)]
        rate_limit: Option<u32>,
    },
}

/// Load configuration honouring the `--config` flag.
pub fn load_config(cli: &Cli) -> sg_domain::Result<Config> {
    Config::load(cli.config.as_deref())
}
