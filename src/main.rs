//! CLI entry point for detector-session
//!
//! Provides a headless front end to one detector:
//! - `run`: connect, log every rendering request and read operator commands
//!   from stdin
//! - `check-config`: load and validate the configuration
//! - `validate-calibration`: check a calibration file against the channel
//!   geometry
//!
//! # Usage
//!
//! ```bash
//! detector-session run --config config/session.toml
//! detector-session validate-calibration cal_z.txt --kind range
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use detector_session::calibration::{validate_upload, CalibrationKind, CalibrationUpload};
use detector_session::catalog::RunKind;
use detector_session::config::{SessionConfig, DEFAULT_CONFIG_PATH};
use detector_session::effects::ConfirmId;
use detector_session::presenter::TracingPresenter;
use detector_session::runtime::{spawn_session, SessionHandle};
use detector_session::session::UserIntent;
use detector_session::tracing_setup;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "detector-session")]
#[command(about = "Headless session client for a remote detector DAQ", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the device and accept commands on stdin
    Run,

    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Check a calibration file against the configured channel geometry
    ValidateCalibration {
        /// Tab-separated calibration file
        file: PathBuf,

        /// Calibration module (position or range)
        #[arg(long, default_value = "position")]
        kind: CalibrationKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SessionConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::CheckConfig => check_config(&config),
        Commands::ValidateCalibration { file, kind } => validate_calibration(&config, &file, kind),
    }
}

fn check_config(config: &SessionConfig) -> Result<()> {
    config.validate()?;
    println!("{}", toml::to_string_pretty(config)?);
    println!("Device URL: {}", config.device.ws_url()?);
    Ok(())
}

fn validate_calibration(config: &SessionConfig, file: &PathBuf, kind: CalibrationKind) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    match validate_upload(&content, kind, &config.device.channels)? {
        CalibrationUpload::Position { x, y, int } => println!(
            "Valid position calibration: {} X, {} Y, {} integral factors",
            x.len(),
            y.len(),
            int.len()
        ),
        CalibrationUpload::Range { z } => {
            println!("Valid range calibration: {} Z factors", z.len())
        }
    }
    Ok(())
}

async fn run(config: SessionConfig) -> Result<()> {
    config.validate()?;
    tracing_setup::init_from_config(&config)?;
    info!(
        app = %config.application.name,
        device = %config.device.name,
        url = %config.device.ws_url()?,
        "Starting session"
    );

    let runtime = spawn_session(&config, TracingPresenter)?;
    let handle = runtime.handle.clone();
    let mut connection_events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = connection_events.recv().await {
            info!(?event, "Connection event");
        }
    });
    handle.begin().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match execute(&handle, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => warn!("{err:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await?;
    runtime.actor.await?;
    runtime.link.await?;
    Ok(())
}

fn parse_run_kind(word: Option<&str>) -> Result<RunKind> {
    match word {
        Some("profile") | Some("position") => Ok(RunKind::Position),
        Some("int") | Some("integral") => Ok(RunKind::Integral),
        Some("range") => Ok(RunKind::Range),
        other => bail!("unknown run kind {other:?}"),
    }
}

fn parse_confirm_id(word: Option<&str>) -> Result<ConfirmId> {
    let raw = word.context("missing confirmation number")?;
    Ok(ConfirmId::from(raw.parse::<u64>()?))
}

/// Handle one stdin line. Returns `false` on `quit`.
async fn execute(handle: &SessionHandle, line: &str) -> Result<bool> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(true);
    };
    let intent = match verb {
        "quit" | "exit" => return Ok(false),
        "status" => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(true);
        }
        "yes" | "no" => {
            let id = parse_confirm_id(words.next())?;
            handle.confirm(id, verb == "yes").await?;
            return Ok(true);
        }
        "start" => UserIntent::ToggleAcquisition,
        "stream" => UserIntent::ToggleStreaming,
        "bkg" => UserIntent::RecordBackground,
        "stop" => UserIntent::Stop,
        "reset-alarms" => UserIntent::ResetAlarms,
        "reset-counters" => UserIntent::ResetCounters,
        "inspect" => UserIntent::InspectControlUnit,
        "runs" => UserIntent::ScanRuns(parse_run_kind(words.next())?),
        "backgrounds" => UserIntent::ScanBackgrounds,
        "calibrations" => UserIntent::ScanCalibrations {
            kind: words.next().unwrap_or("position").parse()?,
            hidden: false,
        },
        "save-run" => UserIntent::SaveRun {
            notes: words.collect::<Vec<_>>().join(" "),
        },
        "discard-run" => UserIntent::DiscardRun,
        "save-bkg" => UserIntent::SaveBackground {
            name: words.next().context("missing background name")?.to_string(),
        },
        "discard-bkg" => UserIntent::DiscardBackground,
        other => bail!("unknown command '{other}'"),
    };
    handle.apply(intent).await?;
    Ok(true)
}
