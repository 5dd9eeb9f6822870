//! Envoy OIDC Filter - OpenID Connect authorization for Envoy ext_authz
//!
//! Serves the decision RPC and the login callback/logout endpoints.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use envoy_oidc_filter::{
    authenticator::Authenticator,
    cli::{Cli, Command},
    config::Config,
    oidc::{HttpClientRegistrar, SessionCodec, SigningKeys},
    server::FilterServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Validate) => run_validate(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> envoy_oidc_filter::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.filter_port {
        config.server.filter_port = port;
    }
    if let Some(port) = cli.callback_port {
        config.server.callback_port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Check configuration and key material without contacting the provider
fn run_validate(config: &Config) -> ExitCode {
    let result = config.validate().and_then(|()| {
        let keys = SigningKeys::load(
            &config.session.private_key_file,
            &config.session.certificate_file,
        )?;
        SessionCodec::from_config(Arc::new(keys), &config.session).self_check()
    });

    match result {
        Ok(()) => {
            println!("Configuration valid");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the startup phase, then serve until shutdown
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %config.provider.url,
        filter_port = config.server.filter_port,
        callback_port = config.server.callback_port,
        "Starting Envoy OIDC filter"
    );

    if config.provider.skip_cert_verify {
        warn!("TLS certificate verification is DISABLED for provider calls");
    }

    let http_client = match config.provider.http_client() {
        Ok(client) => client,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let server_config = config.server.clone();
    let registrar = HttpClientRegistrar::new(http_client.clone(), "envoy-oidc-filter");
    let authenticator = match Authenticator::start(config, &registrar, http_client).await {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!(reason = e.reason_code(), "Startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = FilterServer::new(authenticator, server_config).run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
