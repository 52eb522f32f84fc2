mod config;

pub use config::{show as config_show, validate as config_validate};

use choir_domain::config::Config;
use choir_domain::error::{Error, Result};
use clap::{Parser, Subcommand};

fn default_config_path() -> String {
    std::env::var("CHOIR_CONFIG").unwrap_or_else(|_| "config.toml".into())
}

#[derive(Parser, Debug)]
#[command(name = "choir-gateway", about = "HTTP/WebSocket gateway for the choir multi-agent orchestrator")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value_t = default_config_path())]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP/WebSocket server.
    Serve,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
    /// Validate the configuration and exit nonzero on any error.
    Validate,
}

/// Loads the config from `path`, falling back to built-in defaults
/// when the file is absent so `serve` works with zero setup.
pub fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::load(path)
    } else {
        tracing::warn!(path, "config file not found, using built-in defaults");
        Config::from_toml_str("").map_err(|e| Error::Configuration(format!("building default config: {e}")))
    }
}
