use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod api;
mod config;

use config::{LogFormat, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Session-oriented MCP server over streamable HTTP", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TETHER_CONFIG", default_value = "tether.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "TETHER_PORT", default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "TETHER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log output format, overrides the configuration file
    #[arg(long, env = "TETHER_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,
}

fn init_tracing(level: &str, format: LogFormat) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tether={level},tether_server={level},tether_mcp={level},tower_http=debug"
        ))
    });

    match format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ServerConfig::load(&args.config)?;
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging.level, config.logging.format);

    tracing::info!("Starting tether MCP server");
    if args.config.exists() {
        tracing::info!("Loaded configuration from {}", args.config.display());
    } else {
        tracing::info!("Configuration file not found, using defaults");
    }
    tracing::info!(
        max_sessions = config.session.max_sessions,
        idle_timeout_secs = config.session.idle_timeout_secs,
        close_on_stream_end = config.session.close_on_stream_end,
        "Session policy"
    );

    // Start API server
    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("Starting API server on {}", addr);

    api::serve(&addr, config).await?;

    Ok(())
}
