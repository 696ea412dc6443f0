//! CLI command implementations

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use murmur::{
    AudioSink, FileSink, NullSink, PipelineController, PipelineEvent, PipelineState, SessionParams,
};
use murmurconf::MurmurConfig;
use murmurproto::OutputMode;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Options for `murmur generate` after config overrides are applied.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub prompt: String,
    pub plain: bool,
    pub audio_dir: Option<PathBuf>,
    pub health: bool,
}

/// Run one session, streaming the transcript to stdout.
pub async fn generate(config: &MurmurConfig, opts: GenerateOptions) -> Result<()> {
    if opts.prompt.trim().is_empty() {
        bail!("Prompt is empty");
    }

    let sink: Arc<dyn AudioSink> = match opts.audio_dir.or_else(|| config.playback.audio_dir.clone()) {
        Some(dir) => {
            info!("generate: writing audio segments to {}", dir.display());
            Arc::new(FileSink::new(dir))
        }
        None => Arc::new(NullSink),
    };

    let controller = PipelineController::from_config(config, sink);
    let mut events = controller.subscribe();

    let mode = if opts.plain || !config.backend.json_mode {
        OutputMode::PlainText
    } else {
        OutputMode::Json
    };
    let session = controller
        .start(SessionParams::new(opts.prompt).with_mode(mode))
        .await
        .context("Failed to start session")?;
    info!("generate: session {} ({} mode)", session, mode);

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                eprintln!("Cancelling...");
                controller.cancel().await?;
                break;
            }

            event = events.recv() => {
                match event {
                    Ok(PipelineEvent::TranscriptUpdated { token, .. }) => {
                        write!(stdout, "{}", token)?;
                        stdout.flush()?;
                    }
                    Ok(PipelineEvent::Reconnected { .. }) => {
                        eprintln!();
                        eprintln!("[connection lost, reconnected; transcript restarts]");
                    }
                    Ok(PipelineEvent::AudioSegmentPlayed { segment, error: Some(e), .. }) => {
                        warn!("generate: segment {} failed: {}", segment.seq, e);
                    }
                    Ok(PipelineEvent::StateChanged { state, .. }) if state.is_terminal() => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("generate: display fell behind, skipped {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    writeln!(stdout)?;

    // Completed sessions keep playing queued audio
    let status = tokio::select! {
        status = controller.wait_settled() => status,
        _ = tokio::signal::ctrl_c() => {
            // Cancelling an ended session is a no-op, so stop the audio directly
            controller.cancel().await?;
            controller.stop_audio().await?;
            controller.status()
        }
    };

    if opts.health {
        let health = controller.health().await?;
        eprintln!("{}", serde_json::to_string_pretty(&health)?);
    }

    match status.state {
        PipelineState::Completed => Ok(()),
        PipelineState::Cancelled => bail!("Cancelled"),
        PipelineState::Failed(reason) => bail!("Generation failed: {}", reason),
        other => bail!("Session ended in unexpected state: {}", other),
    }
}

/// Print the effective configuration and where it came from.
pub fn show_config(config_path: Option<&Path>) -> Result<()> {
    let (config, sources) = MurmurConfig::load_with_sources_from(config_path)
        .context("Failed to load configuration")?;

    print!("{}", config.to_toml());

    println!();
    if sources.files.is_empty() {
        println!("# Sources: defaults only");
    } else {
        println!("# Sources:");
        for file in &sources.files {
            println!("#   {}", file.display());
        }
    }
    if !sources.env_overrides.is_empty() {
        println!("# Environment: {}", sources.env_overrides.join(", "));
    }

    Ok(())
}
