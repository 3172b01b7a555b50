//! CLI definitions for the `flowcast` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Workflow chat streaming gateway.
#[derive(Parser)]
#[command(name = "flowcast", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to flowcast.toml. Defaults apply when the file does not exist.
    #[arg(long, short, global = true, env = "FLOWCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server.
    Serve {
        /// Address to listen on, overriding `server.bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_flags() {
        let cli = Cli::try_parse_from(["flowcast", "-vv", "--config", "/etc/flowcast.toml", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/flowcast.toml")));
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:9000")),
            Commands::Config => panic!("expected serve"),
        }
    }
}
