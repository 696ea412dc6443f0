//! murmur - streaming generation-and-playback client
//!
//! Subcommands:
//! - `murmur generate <prompt>` - Stream a generation, printing the transcript
//! - `murmur config` - Show the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use murmurconf::MurmurConfig;

mod commands;

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Stream generated text and speech from a generation service")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./murmur.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one generation session
    Generate {
        /// Prompt sent to the generation service
        prompt: String,

        /// Ask for raw UTF-8 text instead of JSON frames
        #[arg(long)]
        plain: bool,

        /// Backend base URL (e.g., ws://127.0.0.1:8000)
        #[arg(long)]
        url: Option<String>,

        /// WebSocket path on the backend
        #[arg(long)]
        path: Option<String>,

        /// Bearer token, sent as a query parameter
        #[arg(long)]
        token: Option<String>,

        /// Write audio segments to this directory
        #[arg(long)]
        audio_dir: Option<PathBuf>,

        /// OTLP gRPC endpoint for OpenTelemetry (e.g., "localhost:4317")
        #[arg(long)]
        otlp_endpoint: Option<String>,

        /// Print connection health when the session ends
        #[arg(long)]
        health: bool,
    },

    /// Show effective configuration and its sources
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config => commands::show_config(cli.config.as_deref()),
        Commands::Generate {
            prompt,
            plain,
            url,
            path,
            token,
            audio_dir,
            otlp_endpoint,
            health,
        } => {
            let mut config = MurmurConfig::load_from(cli.config.as_deref())
                .context("Failed to load configuration")?;
            if let Some(url) = url {
                config.backend.url = url;
            }
            if let Some(path) = path {
                config.backend.path = path;
            }
            if token.is_some() {
                config.backend.token = token;
            }
            if otlp_endpoint.is_some() {
                config.telemetry.otlp_endpoint = otlp_endpoint;
            }

            init_tracing(&config)?;

            commands::generate(
                &config,
                commands::GenerateOptions {
                    prompt,
                    plain,
                    audio_dir,
                    health,
                },
            )
            .await
        }
    }
}

#[cfg(feature = "otel")]
fn init_tracing(config: &MurmurConfig) -> Result<()> {
    match &config.telemetry.otlp_endpoint {
        Some(endpoint) => murmur::telemetry::init_otlp(endpoint, &config.telemetry.log_level),
        None => murmur::telemetry::init(&config.telemetry.log_level),
    }
}

#[cfg(not(feature = "otel"))]
fn init_tracing(config: &MurmurConfig) -> Result<()> {
    murmur::telemetry::init(&config.telemetry.log_level)?;
    if let Some(endpoint) = &config.telemetry.otlp_endpoint {
        tracing::warn!(
            "OTLP endpoint {} ignored: built without the `otel` feature",
            endpoint
        );
    }
    Ok(())
}
