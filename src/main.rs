use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_ota::cli::Cli;
use a3s_ota::config::OtaConfig;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_directive())),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => OtaConfig::load_from(path)?,
        None => OtaConfig::load()?,
    };

    let ctx = cli.context();
    let request = match cli.into_request(config.defaults) {
        Ok(request) => request,
        Err(e) => e.exit(),
    };

    match a3s_ota::update_with(config.client, &request, &ctx) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}
