use clap::Parser;
use tracing_subscriber::EnvFilter;

use training_portal::cli::utils::output_error;
use training_portal::cli::{Cli, OutputFormat};
use training_portal::config::AppConfig;
use training_portal::error::PortalError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so BACKEND_URL, ADMIN_EMAILS, etc. are picked up
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("Starting training portal CLI in {:?} mode", config.environment);

    let cli = Cli::parse();
    let output_format = OutputFormat::from_cli(&cli);

    if let Err(e) = training_portal::cli::run(cli, config).await {
        let code = e.downcast_ref::<PortalError>().map(PortalError::error_code);
        let message = match std::env::var("CLI_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => format!("{e:?}"),
            _ => e.to_string(),
        };
        output_error(&output_format, &message, code)?;
        std::process::exit(1);
    }

    Ok(())
}
