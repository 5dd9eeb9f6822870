//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OpenID Connect authorization filter for Envoy ext_authz
#[derive(Parser, Debug)]
#[command(name = "envoy-oidc-filter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OIDC_FILTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port of the ext_authz gRPC listener
    #[arg(long, env = "OIDC_FILTER_FILTER_PORT")]
    pub filter_port: Option<u16>,

    /// Port of the HTTP callback listener
    #[arg(long, env = "OIDC_FILTER_CALLBACK_PORT")]
    pub callback_port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "OIDC_FILTER_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "OIDC_FILTER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OIDC_FILTER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the filter (default)
    Serve,

    /// Load and validate the configuration and key material, then exit
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve_mode() {
        let cli = Cli::parse_from(["envoy-oidc-filter"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn port_overrides_parse() {
        let cli = Cli::parse_from([
            "envoy-oidc-filter",
            "--filter-port",
            "9000",
            "--callback-port",
            "9001",
            "validate",
        ]);
        assert_eq!(cli.filter_port, Some(9000));
        assert_eq!(cli.callback_port, Some(9001));
        assert!(matches!(cli.command, Some(Command::Validate)));
    }
}
