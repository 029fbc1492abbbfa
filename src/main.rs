use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use oidc_tenancy::config::{Config, EnvVars, EnvironmentOverrides};
use oidc_tenancy::{server, startup, OidcAuthenticator, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var(EnvVars::LOG_LEVEL).ok())
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level, &cli.log_format)?;

    startup::display_startup_banner(env!("CARGO_PKG_VERSION"));

    let overrides = EnvironmentOverrides::load()?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| overrides.get_config_path(std::path::Path::new(DEFAULT_CONFIG_FILE)));

    let config = Config::load(&config_path, cli.host, cli.port).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let authenticator = OidcAuthenticator::builder(config.oidc.clone())
        .build()
        .context("Failed to build authenticator")?;

    startup::StartupLogger::display_startup_info(
        &config,
        &overrides,
        &authenticator,
        env!("CARGO_PKG_VERSION"),
    );

    if cli.check {
        info!("Configuration at {:?} is valid", config_path);
        return Ok(());
    }

    server::run(&config, Arc::new(authenticator)).await?;
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}
